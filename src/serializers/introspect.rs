//! Default fields for a model's columns.

use super::fields::{
    BooleanField, DateField, Field, FloatField, ISODateTimeField, IntField, JSONField, StringField, UUIDField,
};
use crate::models::{Column, ColumnType, Model};

/// Field a model serializer starts with for one column: optional, nullable
/// exactly when the column is, reading and writing the column itself.
pub fn column_field(column: &Column) -> Field {
    let nullable = column.nullable;
    let field: Field = match &column.ty {
        ColumnType::String { .. } | ColumnType::Text | ColumnType::Char { .. } => {
            let mut f = StringField::new().min_length(0).blank(nullable);
            if let Some(n) = column.ty.max_length() {
                f = f.max_length(n as usize);
            }
            f.required(false).nullable(nullable).source(&column.name).into()
        }
        ColumnType::DateTime => ISODateTimeField::new()
            .required(false)
            .nullable(nullable)
            .source(&column.name)
            .into(),
        ColumnType::Date => DateField::new().required(false).nullable(nullable).source(&column.name).into(),
        ColumnType::Uuid => UUIDField::new().required(false).nullable(nullable).source(&column.name).into(),
        ColumnType::Boolean => BooleanField::new()
            .required(false)
            .nullable(nullable)
            .source(&column.name)
            .into(),
        ColumnType::Integer | ColumnType::BigInteger => {
            IntField::new().required(false).nullable(nullable).source(&column.name).into()
        }
        ColumnType::Float => FloatField::new().required(false).nullable(nullable).source(&column.name).into(),
        ColumnType::Json | ColumnType::Jsonb => {
            JSONField::new().required(false).nullable(nullable).source(&column.name).into()
        }
    };
    field
}

/// One field per column, in column order.
pub fn table_fields(model: &Model) -> Vec<(String, Field)> {
    model
        .columns()
        .iter()
        .map(|c| (c.name.clone(), column_field(c)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnDefault;

    #[test]
    fn maps_column_types() {
        let model = Model::builder("people")
            .column(Column::new("uuid", ColumnType::Uuid).primary_key().default(ColumnDefault::Uuid4))
            .column(Column::new("name", ColumnType::String { max_length: Some(20) }).not_null())
            .column(Column::new("born", ColumnType::Date))
            .column(Column::new("meta", ColumnType::Jsonb))
            .build()
            .unwrap();
        let fields = table_fields(&model);
        let kinds: Vec<(&str, &str)> = fields.iter().map(|(n, f)| (n.as_str(), f.type_name())).collect();
        assert_eq!(
            kinds,
            vec![("uuid", "uuid"), ("name", "string"), ("born", "date"), ("meta", "json")]
        );
        let name = &fields[1].1;
        assert!(!name.options().required);
        assert!(!name.is_nullable());
        assert_eq!(name.options().source.as_deref(), Some("name"));
        assert!(fields[2].1.is_nullable());
    }
}
