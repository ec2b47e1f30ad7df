//! Source skeleton written by `manage startmodule`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const MOD_RS: &str = r#"//! {{name}} module.

pub mod models;
pub mod serializers;
pub mod viewsets;

use serval::store::Store;
use std::sync::Arc;

/// Routes for this module, ready to nest under a prefix.
pub fn routes(store: Arc<dyn Store>) -> Result<axum::Router, serval::ConfigError> {
    let vs: Arc<dyn serval::ViewSet> = Arc::new(viewsets::{{name}}_viewset(store)?);
    Ok(serval::viewset_routes(vs))
}
"#;

const MODELS_RS: &str = r#"use serval::models::{Column, ColumnDefault, ColumnType, Model};
use serval::ConfigError;
use std::sync::Arc;

pub fn {{name}}() -> Result<Arc<Model>, ConfigError> {
    Model::builder("{{name}}")
        .column(Column::new("uuid", ColumnType::Uuid).primary_key().default(ColumnDefault::Uuid4))
        .column(Column::new("name", ColumnType::String { max_length: Some(255) }).not_null())
        .timestamps()
        .build()
}
"#;

const SERIALIZERS_RS: &str = r#"use serval::serializers::{ModelSerializer, Serializer, StringField};
use serval::ConfigError;

pub fn {{name}}_serializer() -> Result<Serializer, ConfigError> {
    ModelSerializer::builder("{{name}}")
        .model(super::models::{{name}}()?)
        .field("name", StringField::new().max_length(255).required(true).source("name"))
        .build()
}
"#;

const VIEWSETS_RS: &str = r#"use serval::store::Store;
use serval::{ConfigError, ModelViewSet};
use std::sync::Arc;

pub fn {{name}}_viewset(store: Arc<dyn Store>) -> Result<ModelViewSet, ConfigError> {
    ModelViewSet::builder(super::models::{{name}}()?, store)
        .serializer(Arc::new(super::serializers::{{name}}_serializer()?))
        .paginate(20, 100)
        .build()
}
"#;

fn render(template: &str, name: &str) -> String {
    template.replace("{{name}}", name)
}

/// Whether `name` can be used as a module and function name.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Write `<dir>/<name>/{mod,models,serializers,viewsets}.rs`. Existing files
/// are left untouched; the paths written are returned.
pub fn write_module(dir: &Path, name: &str) -> io::Result<Vec<PathBuf>> {
    if !is_valid_name(name) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a valid module name", name),
        ));
    }
    let out = dir.join(name);
    fs::create_dir_all(&out)?;
    let mut written = Vec::new();
    for (file, template) in [
        ("mod.rs", MOD_RS),
        ("models.rs", MODELS_RS),
        ("serializers.rs", SERIALIZERS_RS),
        ("viewsets.rs", VIEWSETS_RS),
    ] {
        let path = out.join(file);
        if path.exists() {
            tracing::warn!(path = %path.display(), "exists, skipped");
            continue;
        }
        fs::write(&path, render(template, name))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_names() {
        assert!(is_valid_name("calendars"));
        assert!(is_valid_name("event_types2"));
        assert!(!is_valid_name("Calendars"));
        assert!(!is_valid_name("2fa"));
        assert!(!is_valid_name(""));
    }

    #[test]
    fn writes_skeleton_once() {
        let dir = std::env::temp_dir().join(format!("serval-skel-{}", uuid::Uuid::new_v4()));
        let written = write_module(&dir, "calendars").unwrap();
        assert_eq!(written.len(), 4);
        let models = fs::read_to_string(dir.join("calendars").join("models.rs")).unwrap();
        assert!(models.contains("pub fn calendars()"));
        assert!(models.contains("Model::builder(\"calendars\")"));

        assert!(write_module(&dir, "calendars").unwrap().is_empty());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn rejects_bad_name() {
        let err = write_module(&std::env::temp_dir(), "Bad-Name").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
