//! Load the model document from JSON and resolve it into models and entities.

use crate::config::resolved::{ResolvedEntity, ResolvedModel};
use crate::config::types::*;
use crate::config::{validate, FullConfig};
use crate::error::ConfigError;
use crate::models::{Column, ColumnDefault, ColumnType, Model, CREATED_AT, DELETED_AT, UPDATED_AT};
use crate::value::Value;
use crate::viewsets::Action;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Read a model document (`{"schemas", "tables", "columns", "api_entities"}`).
pub fn load_file(path: &Path) -> Result<FullConfig, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    let config: FullConfig =
        serde_json::from_str(&text).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    tracing::debug!(
        path = %path.display(),
        tables = config.tables.len(),
        api_entities = config.api_entities.len(),
        "model document loaded"
    );
    Ok(config)
}

/// Build resolved model from full config (validates first).
pub fn resolve(config: &FullConfig) -> Result<ResolvedModel, ConfigError> {
    validate(config)?;

    let schemas_by_id: HashMap<_, _> = config.schemas.iter().map(|s| (s.id.as_str(), s)).collect();
    let columns_by_table: HashMap<_, Vec<&ColumnConfig>> = config
        .columns
        .iter()
        .fold(HashMap::new(), |mut m, c| {
            m.entry(c.table_id.as_str()).or_default().push(c);
            m
        });

    let mut models_by_id = HashMap::new();
    let mut models = Vec::new();
    for table in &config.tables {
        let table_columns = columns_by_table
            .get(table.id.as_str())
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        let schema = table
            .schema_id
            .as_deref()
            .and_then(|sid| schemas_by_id.get(sid))
            .map(|s| s.name.clone());
        let model = build_model(table, schema, table_columns)?;
        models_by_id.insert(table.id.as_str(), model.clone());
        models.push(model);
    }

    let mut entities = Vec::new();
    for api in &config.api_entities {
        let model = models_by_id
            .get(api.entity_id.as_str())
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "table",
                id: api.entity_id.clone(),
            })?;
        let actions = if api.operations.is_empty() {
            Action::ALL.to_vec()
        } else {
            api.operations
                .iter()
                .map(|op| op.parse::<Action>().map_err(ConfigError::Validation))
                .collect::<Result<Vec<_>, _>>()?
        };
        entities.push(ResolvedEntity {
            path_segment: api.path_segment.clone(),
            model: model.clone(),
            actions,
            lookup: api.lookup.clone(),
            pagination: api.pagination.map(|p| (p.default, p.max)),
            sensitive_columns: api.sensitive_columns.iter().cloned().collect(),
            validation: api.validation.clone(),
            match_columns: api.match_columns.clone(),
            search_column: api.search_column.clone(),
            camel_case: api.camel_case,
        });
    }

    Ok(ResolvedModel { models, entities })
}

fn build_model(table: &TableConfig, schema: Option<String>, columns: &[&ColumnConfig]) -> Result<Arc<Model>, ConfigError> {
    let pk = table.primary_key.columns();
    let mut builder = Model::builder(table.name.clone());
    if let Some(schema) = schema {
        builder = builder.schema(schema);
    }
    for c in columns {
        let ty = ColumnType::from_str(&c.type_.type_name())?;
        let mut column = Column::new(c.name.clone(), ty).nullable(c.nullable);
        if pk.contains(&c.name.as_str()) {
            column = column.primary_key();
        }
        if c.unique {
            column = column.unique();
        }
        if let Some(default) = &c.default {
            let value = column_default(&table.name, &column, default)?;
            column = column.default(value);
        }
        builder = builder.column(column);
    }

    let declared = |name: &str| columns.iter().any(|c| c.name == name);
    if table.timestamps {
        for name in [CREATED_AT, UPDATED_AT] {
            if !declared(name) {
                builder = builder.column(
                    Column::new(name, ColumnType::DateTime)
                        .not_null()
                        .default(ColumnDefault::Now),
                );
            }
        }
    }
    if table.archivable && !declared(DELETED_AT) {
        builder = builder.column(Column::new(DELETED_AT, ColumnType::DateTime));
    }
    builder.build()
}

fn column_default(table: &str, column: &Column, default: &ColumnDefaultConfig) -> Result<ColumnDefault, ConfigError> {
    match default {
        ColumnDefaultConfig::Expression { expression } => {
            match expression.trim().to_ascii_lowercase().as_str() {
                "gen_random_uuid()" | "uuid_generate_v4()" => Ok(ColumnDefault::Uuid4),
                "now()" | "current_timestamp" => Ok(ColumnDefault::Now),
                _ => Err(ConfigError::Validation(format!(
                    "{}.{}: unsupported default expression {}",
                    table, column.name, expression
                ))),
            }
        }
        ColumnDefaultConfig::Literal(v) => column
            .ty
            .coerce(&Value::from_json(v))
            .map(ColumnDefault::Value)
            .ok_or_else(|| {
                ConfigError::Validation(format!(
                    "{}.{}: default {} does not fit type {}",
                    table,
                    column.name,
                    v,
                    column.ty.pg_type()
                ))
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializers::Context;
    use serde_json::json;

    fn document() -> FullConfig {
        serde_json::from_value(json!({
            "schemas": [{"id": "s1", "name": "app"}],
            "tables": [
                {"id": "t_users", "schema_id": "s1", "name": "users", "primary_key": "id",
                 "timestamps": true, "archivable": true}
            ],
            "columns": [
                {"id": "c1", "table_id": "t_users", "name": "id", "type": "uuid", "nullable": false,
                 "default": {"expression": "gen_random_uuid()"}},
                {"id": "c2", "table_id": "t_users", "name": "email", "type": {"name": "varchar", "params": [120]},
                 "nullable": false},
                {"id": "c3", "table_id": "t_users", "name": "password", "type": "text"},
                {"id": "c4", "table_id": "t_users", "name": "active", "type": "boolean", "default": true}
            ],
            "api_entities": [{
                "entity_id": "t_users",
                "path_segment": "users",
                "operations": ["list", "retrieve", "create"],
                "pagination": {"default": 10, "max": 50},
                "sensitive_columns": ["password"],
                "validation": {"email": {"required": true, "format": "email"}}
            }]
        }))
        .unwrap()
    }

    #[test]
    fn builds_models_with_implicit_columns() {
        let resolved = resolve(&document()).unwrap();
        let users = resolved.model("users").unwrap();
        assert_eq!(users.schema(), Some("app"));
        let names: Vec<&str> = users.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["id", "email", "password", "active", CREATED_AT, UPDATED_AT, DELETED_AT]
        );
        assert_eq!(users.column("email").unwrap().ty, ColumnType::String { max_length: Some(120) });
        assert_eq!(
            users.column("active").unwrap().default,
            Some(ColumnDefault::Value(Value::Bool(true)))
        );
    }

    #[test]
    fn resolves_entities() {
        let resolved = resolve(&document()).unwrap();
        let users = resolved.entity_by_path("users").unwrap();
        assert_eq!(users.actions, vec![Action::List, Action::Retrieve, Action::Create]);
        assert_eq!(users.pagination, Some((10, 50)));
    }

    #[tokio::test]
    async fn entity_serializer_applies_rules() {
        let resolved = resolve(&document()).unwrap();
        let serializer = resolved.entity_by_path("users").unwrap().serializer().unwrap();
        assert_eq!(serializer.field("email").unwrap().type_name(), "email");
        assert!(!serializer.field("password").unwrap().options().write_only);

        let err = serializer
            .validate(None, &json!({"password": "x"}), &Context::default())
            .await
            .unwrap_err();
        match err {
            crate::error::AppError::Validation(e) => assert_eq!(e.messages("email"), vec!["Field is required."]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn sensitive_columns_are_stored_but_never_output() {
        let resolved = resolve(&document()).unwrap();
        let serializer = resolved.entity_by_path("users").unwrap().serializer().unwrap();
        let ctx = Context::default();
        let user = serializer
            .save(None, &json!({"email": "Ann@Example.com", "password": "hunter2"}), &ctx)
            .await
            .unwrap();
        assert_eq!(user.get("password"), Some(&Value::from("hunter2")));

        let out = serializer.serialize(&user, &ctx);
        assert_eq!(out["email"], json!("ann@example.com"));
        assert!(out.get("password").is_none());
    }

    #[test]
    fn unsupported_default_expression_is_rejected() {
        let mut doc = document();
        doc.columns[3].default = Some(ColumnDefaultConfig::Expression {
            expression: "random()".into(),
        });
        assert!(matches!(resolve(&doc), Err(ConfigError::Validation(_))));
    }
}
