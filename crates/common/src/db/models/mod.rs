//! SeaORM entity models

mod enrollment;

pub use enrollment::{
    ActiveModel as EnrollmentActiveModel, Column as EnrollmentColumn, Entity as EnrollmentEntity,
    Model as Enrollment,
};
