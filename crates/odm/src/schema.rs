//! Table schemas derived from model descriptors
//!
//! Relational backends store one row per instance. Each stored field maps to
//! one column; nested models map to foreign-key columns (or key arrays for
//! containers). Field tags steer the mapping:
//! - `column`: column name, defaults to the field name
//! - `column_type`: SQL type written verbatim
//! - `max_length` / `length`: `VARCHAR(n)` for strings
//! - `nullable`, `unique`, `index`: constraints

use crate::error::{ModelError, ModelResult};
use crate::fields::{Element, FieldDescriptor, FieldKind, PrimitiveType};
use crate::registry::{ModelDescriptor, Registry};

/// Column SQL types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    BigInt,
    DoublePrecision,
    Text,
    VarChar(u32),
    Bytea,
    Uuid,
    TimestampTz,
    Date,
    Time,
    Jsonb,
    Array(Box<ColumnType>),
    /// Type given through the `column_type` tag
    Custom(String),
}

impl ColumnType {
    pub fn for_primitive(ty: PrimitiveType, length: Option<u32>) -> Self {
        match ty {
            PrimitiveType::Bool => ColumnType::Boolean,
            PrimitiveType::Integer => ColumnType::BigInt,
            PrimitiveType::Float => ColumnType::DoublePrecision,
            PrimitiveType::String => match length {
                Some(len) => ColumnType::VarChar(len),
                None => ColumnType::Text,
            },
            PrimitiveType::Bytes => ColumnType::Bytea,
            PrimitiveType::Uuid => ColumnType::Uuid,
            PrimitiveType::DateTime => ColumnType::TimestampTz,
            PrimitiveType::Date => ColumnType::Date,
            PrimitiveType::Time => ColumnType::Time,
            PrimitiveType::Json => ColumnType::Jsonb,
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::DoublePrecision => "DOUBLE PRECISION".to_string(),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::VarChar(len) => format!("VARCHAR({})", len),
            ColumnType::Bytea => "BYTEA".to_string(),
            ColumnType::Uuid => "UUID".to_string(),
            ColumnType::TimestampTz => "TIMESTAMPTZ".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Time => "TIME".to_string(),
            ColumnType::Jsonb => "JSONB".to_string(),
            ColumnType::Array(inner) => format!("{}[]", inner.to_sql()),
            ColumnType::Custom(sql) => sql.clone(),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, ColumnType::Array(_))
    }
}

/// Target of a foreign-key column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Referenced model name
    pub model: String,
    /// Referenced table, when the model was registered at schema build time
    pub table: Option<String>,
    pub column: String,
}

/// What a column holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRole {
    Value,
    /// Key of one referenced instance
    ForeignKey(ForeignKey),
    /// Keys of several referenced instances
    ForeignKeyList(ForeignKey),
}

impl ColumnRole {
    pub fn foreign_key(&self) -> Option<&ForeignKey> {
        match self {
            ColumnRole::ForeignKey(fk) | ColumnRole::ForeignKeyList(fk) => Some(fk),
            ColumnRole::Value => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    /// Model field stored in this column
    pub field: String,
    pub column_type: ColumnType,
    pub role: ColumnRole,
    pub nullable: bool,
    pub unique: bool,
    pub indexed: bool,
}

impl ColumnSchema {
    fn from_field(
        model: &str,
        field: &FieldDescriptor,
        registry: &Registry,
    ) -> ModelResult<Self> {
        let length = field
            .tag_u64("max_length")
            .or_else(|| field.tag_u64("length"))
            .and_then(|len| u32::try_from(len).ok());

        let (column_type, role) = match field.kind() {
            FieldKind::Primitive(ty) => (ColumnType::for_primitive(*ty, length), ColumnRole::Value),
            FieldKind::Model(target) => (
                ColumnType::BigInt,
                ColumnRole::ForeignKey(foreign_key(target, registry)),
            ),
            FieldKind::SequenceOf(element) | FieldKind::SetOf(element) => match element {
                Element::Model(target) => (
                    ColumnType::Array(Box::new(ColumnType::BigInt)),
                    ColumnRole::ForeignKeyList(foreign_key(target, registry)),
                ),
                Element::Primitive(PrimitiveType::Bytes | PrimitiveType::Json) => {
                    (ColumnType::Jsonb, ColumnRole::Value)
                }
                Element::Primitive(ty) => (
                    ColumnType::Array(Box::new(ColumnType::for_primitive(*ty, length))),
                    ColumnRole::Value,
                ),
            },
            FieldKind::Mapping(Element::Primitive(_)) => (ColumnType::Jsonb, ColumnRole::Value),
            FieldKind::Mapping(Element::Model(_)) => {
                return Err(ModelError::Configuration(format!(
                    "Field '{}' of '{}' maps to models, which a table column cannot hold",
                    field.name(),
                    model
                )))
            }
        };

        let column_type = match field.tag_str("column_type") {
            Some(sql) => ColumnType::Custom(sql.to_string()),
            None => column_type,
        };

        Ok(Self {
            name: field.tag_str("column").unwrap_or(field.name()).to_string(),
            field: field.name().to_string(),
            column_type,
            role,
            nullable: field.tag_bool("nullable").unwrap_or(true),
            unique: field.tag_bool("unique").unwrap_or(false),
            indexed: field.tag_bool("index").unwrap_or(false),
        })
    }

    fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.column_type.to_sql());
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let ColumnRole::ForeignKey(ForeignKey {
            table: Some(table),
            column,
            ..
        }) = &self.role
        {
            sql.push_str(&format!(
                " REFERENCES {} ({})",
                quote_ident(table),
                quote_ident(column)
            ));
        }
        sql
    }
}

fn foreign_key(target: &str, registry: &Registry) -> ForeignKey {
    match registry.resolve(target) {
        Ok(descriptor) => ForeignKey {
            model: target.to_string(),
            table: Some(descriptor.collection().to_string()),
            column: descriptor.primary_key().to_string(),
        },
        Err(_) => {
            tracing::debug!(
                model = %target,
                "Referenced model not registered yet, omitting constraint"
            );
            ForeignKey {
                model: target.to_string(),
                table: None,
                column: "id".to_string(),
            }
        }
    }
}

/// Table layout of one model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub model: String,
    pub primary_key: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    /// Lay out the stored fields of a model. Excluded fields get no column.
    pub fn from_descriptor(descriptor: &ModelDescriptor, registry: &Registry) -> ModelResult<Self> {
        let mut columns: Vec<ColumnSchema> = Vec::new();

        for field in descriptor.fields().stored() {
            let column = ColumnSchema::from_field(descriptor.name(), field, registry)?;
            if column.name == descriptor.primary_key()
                || columns.iter().any(|existing| existing.name == column.name)
            {
                return Err(ModelError::Configuration(format!(
                    "Column '{}' of table '{}' is declared more than once",
                    column.name,
                    descriptor.collection()
                )));
            }
            columns.push(column);
        }

        Ok(Self {
            table: descriptor.collection().to_string(),
            model: descriptor.name().to_string(),
            primary_key: descriptor.primary_key().to_string(),
            columns,
        })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Column storing a model field
    pub fn column_for_field(&self, field: &str) -> ModelResult<&ColumnSchema> {
        self.columns
            .iter()
            .find(|column| column.field == field)
            .ok_or_else(|| ModelError::unknown_field(&self.model, field))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect()
    }

    /// `CREATE TABLE` statement for this table
    pub fn create_table_sql(&self) -> String {
        let mut definitions = vec![format!(
            "{} BIGSERIAL PRIMARY KEY",
            quote_ident(&self.primary_key)
        )];
        definitions.extend(self.columns.iter().map(ColumnSchema::to_sql));

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({});",
            quote_ident(&self.table),
            definitions.join(", ")
        )
    }

    /// `CREATE INDEX` statements for columns tagged `index`
    pub fn create_index_sql(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|column| column.indexed)
            .map(|column| {
                format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({});",
                    quote_ident(&format!("idx_{}_{}", self.table, column.name)),
                    quote_ident(&self.table),
                    quote_ident(&column.name)
                )
            })
            .collect()
    }
}

/// Quote an SQL identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldTable;

    fn descriptor(name: &str, fields: Vec<FieldDescriptor>) -> ModelDescriptor {
        ModelDescriptor::builder(name, FieldTable::new(name, fields).unwrap())
            .collection(name.to_lowercase())
            .build()
    }

    #[test]
    fn test_columns_follow_tags() {
        let registry = Registry::new();
        registry
            .register_descriptor(descriptor(
                "Author",
                vec![FieldDescriptor::primitive("name", PrimitiveType::String)],
            ))
            .unwrap();

        let book = descriptor(
            "Book",
            vec![
                FieldDescriptor::primitive("title", PrimitiveType::String)
                    .tag("max_length", 120)
                    .tag("nullable", false),
                FieldDescriptor::model("author", "Author").tag("column", "author_id"),
                FieldDescriptor::sequence_of("reviewers", Element::model("Author")),
                FieldDescriptor::set_of("labels", PrimitiveType::String),
                FieldDescriptor::primitive("draft", PrimitiveType::Json).exclude(),
            ],
        );
        let schema = TableSchema::from_descriptor(&book, &registry).unwrap();

        assert_eq!(schema.table, "book");
        assert_eq!(schema.column_names(), vec!["title", "author_id", "reviewers", "labels"]);
        assert_eq!(schema.column("title").unwrap().column_type, ColumnType::VarChar(120));
        assert_eq!(schema.column_for_field("author").unwrap().name, "author_id");
        assert!(matches!(
            schema.column_for_field("draft"),
            Err(ModelError::UnknownField { .. })
        ));

        let fk = schema.column("author_id").unwrap().role.foreign_key().unwrap();
        assert_eq!(fk.table.as_deref(), Some("author"));
        assert!(matches!(
            schema.column("reviewers").unwrap().role,
            ColumnRole::ForeignKeyList(_)
        ));
    }

    #[test]
    fn test_create_table_sql() {
        let registry = Registry::new();
        let user = descriptor(
            "User",
            vec![
                FieldDescriptor::primitive("email", PrimitiveType::String)
                    .tag("length", 255)
                    .tag("nullable", false)
                    .tag("unique", true)
                    .tag("index", true),
                FieldDescriptor::primitive("score", PrimitiveType::Float),
                FieldDescriptor::primitive("meta", PrimitiveType::Json)
                    .tag("column_type", "JSON"),
                FieldDescriptor::primitive("born", PrimitiveType::Date),
                FieldDescriptor::set_of("alarms", PrimitiveType::Time),
            ],
        );
        let schema = TableSchema::from_descriptor(&user, &registry).unwrap();

        assert_eq!(
            schema.create_table_sql(),
            "CREATE TABLE IF NOT EXISTS \"user\" (\"id\" BIGSERIAL PRIMARY KEY, \
             \"email\" VARCHAR(255) NOT NULL UNIQUE, \"score\" DOUBLE PRECISION, \
             \"meta\" JSON, \"born\" DATE, \"alarms\" TIME[]);"
        );
        assert_eq!(
            schema.create_index_sql(),
            vec![
                "CREATE INDEX IF NOT EXISTS \"idx_user_email\" ON \"user\" (\"email\");"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_conflicting_columns_rejected() {
        let registry = Registry::new();
        let clash = descriptor(
            "Clash",
            vec![
                FieldDescriptor::primitive("a", PrimitiveType::String).tag("column", "value"),
                FieldDescriptor::primitive("b", PrimitiveType::String).tag("column", "value"),
            ],
        );
        assert!(matches!(
            TableSchema::from_descriptor(&clash, &registry),
            Err(ModelError::Configuration(_))
        ));

        let pk_clash = descriptor(
            "PkClash",
            vec![FieldDescriptor::primitive("id", PrimitiveType::Integer)],
        );
        assert!(TableSchema::from_descriptor(&pk_clash, &registry).is_err());
    }

    #[test]
    fn test_model_mappings_rejected() {
        let registry = Registry::new();
        let bad = descriptor(
            "Bad",
            vec![FieldDescriptor::mapping("by_name", Element::model("Author"))],
        );
        assert!(matches!(
            TableSchema::from_descriptor(&bad, &registry),
            Err(ModelError::Configuration(_))
        ));
    }
}
