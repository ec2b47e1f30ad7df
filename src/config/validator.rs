//! Config validation: referential integrity and API consistency.

use crate::config::FullConfig;
use crate::error::ConfigError;
use crate::viewsets::Action;
use std::collections::HashSet;

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let schema_ids: HashSet<&str> = config.schemas.iter().map(|s| s.id.as_str()).collect();
    let mut table_ids = HashSet::new();

    for t in &config.tables {
        if !table_ids.insert(t.id.as_str()) {
            return Err(ConfigError::Validation(format!("table id {} declared twice", t.id)));
        }
        if let Some(sid) = t.schema_id.as_deref() {
            if !schema_ids.contains(sid) {
                return Err(ConfigError::MissingReference {
                    kind: "schema",
                    id: sid.to_string(),
                });
            }
        }
        let table_columns: HashSet<&str> = config
            .columns
            .iter()
            .filter(|c| c.table_id == t.id)
            .map(|c| c.name.as_str())
            .collect();
        for pk in t.primary_key.columns() {
            if !table_columns.contains(pk) {
                return Err(ConfigError::InvalidPrimaryKey {
                    table_id: t.id.clone(),
                    column: pk.to_string(),
                });
            }
        }
    }

    for c in &config.columns {
        if !table_ids.contains(c.table_id.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "table",
                id: c.table_id.clone(),
            });
        }
    }

    let mut path_segments = HashSet::new();
    for api in &config.api_entities {
        if !table_ids.contains(api.entity_id.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "table",
                id: api.entity_id.clone(),
            });
        }
        if !path_segments.insert(api.path_segment.as_str()) {
            return Err(ConfigError::DuplicatePathSegment(api.path_segment.clone()));
        }
        for op in &api.operations {
            op.parse::<Action>().map_err(ConfigError::Validation)?;
        }
        let columns: HashSet<&str> = config
            .columns
            .iter()
            .filter(|c| c.table_id == api.entity_id)
            .map(|c| c.name.as_str())
            .collect();
        let referenced = api
            .validation
            .keys()
            .chain(api.sensitive_columns.iter())
            .chain(api.match_columns.iter())
            .chain(api.search_column.iter());
        for name in referenced {
            if !columns.contains(name.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "column",
                    id: format!("{}.{}", api.entity_id, name),
                });
            }
        }
    }

    Ok(())
}
