use crate::error::SchemaError;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

/// A loaded schema: every entity in declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rulebook {
    pub entities: Vec<EntitySchema>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntitySchema {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub lookups: Vec<LookupDef>,
    pub aggregations: Vec<AggregationDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Assigned from constructor arguments. Keeps the schema's type string.
    Stored { type_name: String },
    Calculated { formula: String, description: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LookupDef {
    pub name: String,
    pub relation: RelationKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelationKind {
    OneToMany,
    ManyToMany,
    /// A projection over one of the entity's own collections.
    DerivedThis { join_condition: String },
    /// Any other declared relation (`many_to_one`, ...). Emits nothing.
    Reference,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AggregationDef {
    pub name: String,
    #[serde(default)]
    pub formula: String,
    #[serde(default)]
    pub description: String,
}

// Document shapes as they appear on disk.

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Document {
    MetaModel {
        #[serde(rename = "meta-model")]
        meta_model: MetaModel,
    },
    Schema(SchemaBody),
    Entities(Vec<RawEntity>),
}

#[derive(Debug, Deserialize)]
struct MetaModel {
    schema: SchemaBody,
}

#[derive(Debug, Deserialize)]
struct SchemaBody {
    entities: Vec<RawEntity>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    name: String,
    #[serde(default)]
    fields: Vec<RawField>,
    #[serde(default)]
    lookups: Vec<RawLookup>,
    #[serde(default)]
    aggregations: Vec<AggregationDef>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    name: String,
    #[serde(rename = "type", default)]
    type_name: Option<String>,
    #[serde(default)]
    formula: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct RawLookup {
    name: String,
    #[serde(rename = "type", default)]
    type_name: Option<String>,
    #[serde(default, alias = "targetEntity")]
    target_entity: Option<String>,
    #[serde(default, alias = "joinCondition")]
    join_condition: Option<String>,
}

impl From<RawField> for FieldDef {
    fn from(raw: RawField) -> Self {
        let kind = match raw.type_name.as_deref() {
            Some("calculated") => FieldKind::Calculated {
                formula: raw.formula,
                description: raw.description,
            },
            other => FieldKind::Stored {
                type_name: other.unwrap_or("scalar").to_string(),
            },
        };
        FieldDef { name: raw.name, kind }
    }
}

impl From<RawLookup> for LookupDef {
    fn from(raw: RawLookup) -> Self {
        let relation = match (raw.target_entity.as_deref(), raw.join_condition, raw.type_name) {
            (Some("this"), Some(join_condition), _) => RelationKind::DerivedThis { join_condition },
            (_, _, Some(t)) if t == "one_to_many" => RelationKind::OneToMany,
            (_, _, Some(t)) if t == "many_to_many" => RelationKind::ManyToMany,
            _ => RelationKind::Reference,
        };
        LookupDef { name: raw.name, relation }
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

const RESERVED: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue", "def",
    "del", "elif", "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is",
    "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

/// True if `name` can be used as a class, attribute or property name.
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_pattern().is_match(name) && !RESERVED.contains(&name)
}

fn check_identifier(what: &str, name: &str) -> Result<(), SchemaError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier {
            what: what.to_string(),
            name: name.to_string(),
        })
    }
}

impl TryFrom<RawEntity> for EntitySchema {
    type Error = SchemaError;

    fn try_from(raw: RawEntity) -> Result<Self, Self::Error> {
        check_identifier("entity", &raw.name)?;
        let entity = EntitySchema {
            name: raw.name,
            fields: raw.fields.into_iter().map(FieldDef::from).collect(),
            lookups: raw.lookups.into_iter().map(LookupDef::from).collect(),
            aggregations: raw.aggregations,
        };

        let mut seen = HashSet::new();
        for member in entity.member_names() {
            check_identifier(&format!("member of {}", entity.name), member)?;
            if !seen.insert(member) {
                return Err(SchemaError::DuplicateMember {
                    entity: entity.name.clone(),
                    member: member.to_string(),
                });
            }
        }
        Ok(entity)
    }
}

impl EntitySchema {
    /// Every field, lookup and aggregation name, in declaration order.
    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.lookups.iter().map(|l| l.name.as_str()))
            .chain(self.aggregations.iter().map(|a| a.name.as_str()))
    }

    pub fn stored_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Stored { .. }))
    }

    pub fn formula_count(&self) -> usize {
        let calculated = self
            .fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Calculated { .. }))
            .count();
        calculated + self.aggregations.len()
    }
}

impl Rulebook {
    pub fn from_json_str(json_str: &str) -> Result<Self, SchemaError> {
        let document: Document = serde_json::from_str(json_str)?;
        let raw_entities = match document {
            Document::MetaModel { meta_model } => meta_model.schema.entities,
            Document::Schema(body) => body.entities,
            Document::Entities(entities) => entities,
        };

        let mut names = HashSet::new();
        let mut entities = Vec::with_capacity(raw_entities.len());
        for raw in raw_entities {
            let entity = EntitySchema::try_from(raw)?;
            if !names.insert(entity.name.clone()) {
                return Err(SchemaError::DuplicateEntity(entity.name));
            }
            entities.push(entity);
        }
        Ok(Rulebook { entities })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn formula_count(&self) -> usize {
        self.entities.iter().map(EntitySchema::formula_count).sum()
    }
}
