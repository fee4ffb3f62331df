//! Response-shape normalization for the external backend
//!
//! The backend returns lists either bare or wrapped, and spells field names
//! several ways depending on its version. Everything is mapped to canonical
//! names here so the rest of the crate never branches on upstream shape.

use crate::enrollment::{Course, StudentRecord};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Canonical field name followed by the upstream spellings, in priority order
pub type FieldMap = &'static [(&'static str, &'static [&'static str])];

/// Keys a list may be wrapped in
pub const LIST_WRAPPERS: &[&str] = &["data", "rows", "items"];

pub const COURSE_FIELDS: FieldMap = &[
    ("id", &["id", "id_curso", "idCurso", "curso_id", "cursoId", "ID"]),
    ("nombre", &["nombre", "nombre_curso", "nombreCurso", "Nombre", "name"]),
    ("costo", &["costo", "costo_curso", "Costo", "precio", "fee"]),
    ("ubicacion", &["ubicacion", "lugar", "sede", "Ubicacion", "location"]),
    ("empresa", &["empresa", "nombre_empresa", "nombreEmpresa", "Empresa", "company"]),
];

pub const STUDENT_FIELDS: FieldMap = &[
    ("curp", &["curp", "CURP", "Curp"]),
    ("nombre", &["nombre", "nombres", "Nombre", "name"]),
    ("apellidoPaterno", &["apellidoPaterno", "apellido_paterno", "ApellidoPaterno", "paterno"]),
    ("apellidoMaterno", &["apellidoMaterno", "apellido_materno", "ApellidoMaterno", "materno"]),
    ("fechaNacimiento", &["fechaNacimiento", "fecha_nacimiento", "FechaNacimiento"]),
    ("puesto", &["puesto", "Puesto", "ocupacion"]),
    ("estadoNacimiento", &["estadoNacimiento", "estado_nacimiento", "entidad_nacimiento", "entidadNacimiento"]),
    ("rfc", &["rfc", "RFC", "Rfc"]),
];

/// Body fragments backends use to report an existing record as an error
const DUPLICATE_MARKERS: &[&str] = &[
    "ya existe",
    "ya esta registrado",
    "ya está registrado",
    "already exists",
    "duplicate",
    "duplicad",
    "unique constraint",
];

/// Extract a list from a bare array or a `{data: [...]}`-style wrapper
pub fn unwrap_list(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            for key in LIST_WRAPPERS {
                if let Some(inner) = map.remove(*key) {
                    return match inner {
                        Value::Array(items) => items,
                        Value::Object(_) => unwrap_list(inner),
                        _ => Vec::new(),
                    };
                }
            }
            tracing::warn!(
                keys = ?map.keys().collect::<Vec<_>>(),
                "Backend list response had no recognised wrapper"
            );
            Vec::new()
        }
        Value::Null => Vec::new(),
        other => {
            tracing::warn!(kind = %value_kind(&other), "Unexpected backend list response");
            Vec::new()
        }
    }
}

/// Rename a record's fields to their canonical names. Unmapped fields are dropped.
pub fn canonicalize(record: &Value, fields: FieldMap) -> Option<Map<String, Value>> {
    let source = record.as_object()?;
    let mut canonical = Map::new();
    for (name, variants) in fields {
        let found = variants
            .iter()
            .filter_map(|variant| source.get(*variant))
            .find(|value| !value.is_null());
        if let Some(value) = found {
            canonical.insert((*name).to_string(), value.clone());
        }
    }
    Some(canonical)
}

fn decode_all<T: DeserializeOwned>(items: Vec<Value>, fields: FieldMap, kind: &str) -> Vec<T> {
    items
        .iter()
        .filter_map(|item| {
            let canonical = canonicalize(item, fields)?;
            match serde_json::from_value(Value::Object(canonical)) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    tracing::warn!(kind, error = %e, "Skipping malformed backend record");
                    None
                }
            }
        })
        .collect()
}

/// Decode a backend course list
pub fn courses(body: Value) -> Vec<Course> {
    decode_all(unwrap_list(body), COURSE_FIELDS, "course")
}

/// Decode a backend student list
pub fn students(body: Value) -> Vec<StudentRecord> {
    decode_all(unwrap_list(body), STUDENT_FIELDS, "student")
}

/// Whether an error body is really an "already exists" answer
pub fn mentions_duplicate(body: &str) -> bool {
    let lowered = body.to_lowercase();
    DUPLICATE_MARKERS.iter().any(|marker| lowered.contains(marker))
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_bare_and_wrapped() {
        assert_eq!(unwrap_list(json!([1, 2])).len(), 2);
        assert_eq!(unwrap_list(json!({ "data": [1, 2, 3] })).len(), 3);
        assert_eq!(unwrap_list(json!({ "success": true, "rows": [1] })).len(), 1);
        assert_eq!(unwrap_list(json!({ "data": { "items": [1, 2] } })).len(), 2);
        assert!(unwrap_list(json!({ "message": "no data" })).is_empty());
        assert!(unwrap_list(json!("oops")).is_empty());
    }

    #[test]
    fn test_course_field_variants() {
        let body = json!({
            "data": [
                { "id_curso": 5, "nombre_curso": "Soldadura", "costo": "500.00", "lugar": "CDMX" },
                { "idCurso": "6", "nombreCurso": "Montacargas", "precio": 750, "nombreEmpresa": "ACME" },
                { "ID": 7, "name": "Primeros auxilios" }
            ]
        });

        let parsed = courses(body);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].id, 5);
        assert_eq!(parsed[0].name, "Soldadura");
        assert_eq!(parsed[0].fee, Some(500.0));
        assert_eq!(parsed[0].location.as_deref(), Some("CDMX"));
        assert_eq!(parsed[1].id, 6);
        assert_eq!(parsed[1].company.as_deref(), Some("ACME"));
        assert_eq!(parsed[2].name, "Primeros auxilios");
        assert!(parsed[2].fee.is_none());
    }

    #[test]
    fn test_canonical_name_wins_over_variant() {
        let record = json!({ "id": 1, "id_curso": 99, "nombre": null, "name": "Fallback" });
        let canonical = canonicalize(&record, COURSE_FIELDS).unwrap();
        assert_eq!(canonical["id"], json!(1));
        assert_eq!(canonical["nombre"], json!("Fallback"));
    }

    #[test]
    fn test_student_field_variants_and_malformed_records() {
        let body = json!([
            { "CURP": "ABC123", "nombre": "Juan", "apellido_paterno": "Pérez" },
            { "curp": "XYZ789", "nombres": "Ana", "apellidoPaterno": "Ruiz", "apellidoMaterno": "Gil" },
            { "nombre": "Sin CURP" }
        ]);

        let parsed = students(body);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].identity_code, "ABC123");
        assert_eq!(parsed[0].paternal_surname, "Pérez");
        assert_eq!(parsed[1].maternal_surname, "Gil");
    }

    #[test]
    fn test_duplicate_markers() {
        assert!(mentions_duplicate(r#"{"error":"El alumno ya existe"}"#));
        assert!(mentions_duplicate("ER_DUP_ENTRY: Duplicate entry 'ABC' for key 'PRIMARY'"));
        assert!(!mentions_duplicate("connection reset"));
    }
}
