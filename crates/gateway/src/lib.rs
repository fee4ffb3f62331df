//! CourseDesk API Gateway
//!
//! HTTP surface for the enrollment UI:
//! - Enrollment reconciliation
//! - Course and student passthrough
//! - Login with server-side lockout
//! - Health, rate limiting and request metrics

pub mod handlers;
pub mod middleware;

use axum::{
    extract::Request,
    middleware::{from_fn, map_response, Next},
    routing::{get, post},
    Router,
};
use coursedesk_common::{
    backend::BackendApi,
    config::AppConfig,
    enrollment::{EnrollmentReconciler, EnrollmentStore},
    lockout::LoginThrottle,
};
use middleware::rate_limit::{rate_limit_middleware, RateLimit};
use std::sync::Arc;
use tower::{limit::ConcurrencyLimitLayer, ServiceBuilder};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub backend: Arc<dyn BackendApi>,
    pub store: Option<Arc<dyn EnrollmentStore>>,
    pub reconciler: Arc<EnrollmentReconciler>,
    pub throttle: LoginThrottle,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        backend: Arc<dyn BackendApi>,
        store: Option<Arc<dyn EnrollmentStore>>,
        throttle: LoginThrottle,
    ) -> Self {
        let reconciler = Arc::new(
            EnrollmentReconciler::new(backend.clone(), store.clone(), config.outbound_timeout())
                .with_deadline(config.enrollment_deadline()),
        );

        Self {
            config,
            backend,
            store,
            reconciler,
            throttle,
        }
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let config = state.config.clone();

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        .route("/inscripciones", post(handlers::enrollments::enroll))
        .route("/cursos", get(handlers::catalog::list_courses))
        .route(
            "/alumnos",
            get(handlers::catalog::list_students).post(handlers::catalog::create_student),
        )
        .route("/auth/login", post(handlers::auth::login));

    let mut router = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/api", api_routes)
        .route_layer(from_fn(middleware::metrics::track_metrics));

    if config.rate_limit.enabled {
        let limit = RateLimit::new(config.rate_limit.requests_per_second, config.rate_limit.burst);
        router = router.layer(from_fn(move |request: Request, next: Next| {
            let limit = limit.clone();
            async move { rate_limit_middleware(request, next, limit).await }
        }));
    }

    router
        .layer(
            ServiceBuilder::new()
                // Timed-out requests still get the JSON error body
                .layer(map_response(middleware::timeout::timeout_envelope))
                // Request timeout
                .layer(TimeoutLayer::new(config.request_timeout()))
                // Concurrency limit for backpressure
                .layer(ConcurrencyLimitLayer::new(
                    config.server.max_concurrent_requests.max(1),
                )),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}
