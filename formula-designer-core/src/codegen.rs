use crate::context::CompilerContext;
use crate::error::FormulaError;
use crate::models::{EntitySchema, FieldKind, RelationKind};
use crate::parser::parse_formula;
use crate::subfield::project_join_condition;

const INDENT: &str = "    ";

/// A formula that could not be compiled. Its accessor was emitted as a stub.
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaFailure {
    pub entity: String,
    pub member: String,
    pub formula: String,
    pub error: FormulaError,
}

/// The class generated for one entity, plus what its formulas depend on.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityOutput {
    pub name: String,
    pub code: String,
    pub context: CompilerContext,
    pub failures: Vec<FormulaFailure>,
}

// Docstrings are triple-quoted: keep backslashes and quote runs from closing them early.
fn docstring_text(text: &str) -> String {
    text.replace('\\', "\\\\").replace("\"\"\"", "\\\"\\\"\\\"")
}

fn comment_text(text: &str) -> String {
    text.lines().map(str::trim).collect::<Vec<_>>().join(" ")
}

struct ClassWriter {
    entity: String,
    lines: Vec<String>,
    context: CompilerContext,
    failures: Vec<FormulaFailure>,
}

impl ClassWriter {
    fn new(entity: &str) -> Self {
        ClassWriter {
            entity: entity.to_string(),
            lines: Vec::new(),
            context: CompilerContext::new(),
            failures: Vec::new(),
        }
    }

    fn line(&mut self, depth: usize, text: impl AsRef<str>) {
        self.lines.push(format!("{}{}", INDENT.repeat(depth), text.as_ref()));
    }

    fn blank(&mut self) {
        self.lines.push(String::new());
    }

    fn constructor(&mut self, entity: &EntitySchema) {
        self.line(1, "def __init__(self, **kwargs):");
        let mut empty = true;
        for field in entity.stored_fields() {
            let assign = format!("self.{0} = kwargs.get('{0}')", field.name);
            match &field.kind {
                FieldKind::Stored { type_name } if type_name != "scalar" => {
                    self.line(2, format!("{}  # {}", assign, comment_text(type_name)))
                }
                _ => self.line(2, assign),
            }
            empty = false;
        }

        let collections: Vec<&str> = entity
            .lookups
            .iter()
            .filter(|l| matches!(l.relation, RelationKind::OneToMany | RelationKind::ManyToMany))
            .map(|l| l.name.as_str())
            .collect();
        if !collections.is_empty() {
            if !empty {
                self.blank();
            }
            for name in collections {
                self.line(2, format!("self.{0} = CollectionWrapper(self, '{0}')", name));
            }
            empty = false;
        }

        if empty {
            self.line(2, "pass");
        }
    }

    fn property_header(&mut self, name: &str, doc: &[String]) {
        self.blank();
        self.line(1, "@property");
        self.line(1, format!("def {}(self):", name));
        match doc {
            [single] => self.line(2, format!("\"\"\"{}\"\"\"", single)),
            _ => {
                let mut first = true;
                for text in doc {
                    if first {
                        self.line(2, format!("\"\"\"{}", text));
                        first = false;
                    } else {
                        self.line(2, text);
                    }
                }
                self.line(2, "\"\"\"");
            }
        }
    }

    fn stub_body(&mut self, member: &str, formula: &str, error: FormulaError) {
        log::warn!("{}.{}: {} (formula: {})", self.entity, member, error, formula);
        self.line(2, format!("# Formula error: {}", comment_text(&error.to_string())));
        self.line(2, "return None");
        self.failures.push(FormulaFailure {
            entity: self.entity.clone(),
            member: member.to_string(),
            formula: formula.to_string(),
            error,
        });
    }

    fn formula_accessor(&mut self, name: &str, formula: &str, description: &str) {
        let doc = vec![
            docstring_text(description),
            format!("Original formula: {}", docstring_text(&comment_text(formula))),
        ];
        self.property_header(name, &doc);
        match parse_formula(formula) {
            Ok(fragment) => {
                log::debug!("{}.{} => {}", self.entity, name, fragment.code);
                self.context.record(&fragment);
                self.line(2, format!("return {}", fragment.code));
            }
            Err(error) => self.stub_body(name, formula, error),
        }
    }

    fn derived_accessor(&mut self, name: &str, join_condition: &str) {
        let doc = vec![format!(
            "Derived from {}",
            docstring_text(&comment_text(join_condition))
        )];
        self.property_header(name, &doc);
        match project_join_condition(join_condition) {
            Ok(code) => {
                log::debug!("{}.{} => {}", self.entity, name, code);
                self.line(2, format!("return {}", code));
            }
            Err(error) => self.stub_body(name, join_condition, error),
        }
    }

    fn finish(self) -> EntityOutput {
        EntityOutput {
            name: self.entity,
            code: self.lines.join("\n"),
            context: self.context,
            failures: self.failures,
        }
    }
}

/// Emits the class for `entity`.
///
/// Members appear in declaration order: the constructor, derived lookups,
/// calculated fields, then aggregations. A formula that fails to compile
/// becomes an accessor returning `None` with the error as a comment.
pub fn generate_entity(entity: &EntitySchema) -> EntityOutput {
    let mut writer = ClassWriter::new(&entity.name);
    writer.line(0, format!("class {}:", entity.name));
    writer.line(1, format!("\"\"\"Plain data container for {} entities.\"\"\"", entity.name));
    writer.constructor(entity);

    for lookup in &entity.lookups {
        if let RelationKind::DerivedThis { join_condition } = &lookup.relation {
            writer.derived_accessor(&lookup.name, join_condition);
        }
    }
    for field in &entity.fields {
        if let FieldKind::Calculated { formula, description } = &field.kind {
            writer.formula_accessor(&field.name, formula, description);
        }
    }
    for aggregation in &entity.aggregations {
        writer.formula_accessor(&aggregation.name, &aggregation.formula, &aggregation.description);
    }

    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rulebook;
    use serde_json::json;

    fn entity(doc: serde_json::Value) -> EntitySchema {
        Rulebook::from_json_str(&json!([doc]).to_string())
            .unwrap()
            .entities
            .remove(0)
    }

    #[test]
    fn test_constructor_and_collections() {
        let output = generate_entity(&entity(json!({
            "name": "Team",
            "fields": [{"name": "id"}, {"name": "city", "type": "string"}],
            "lookups": [
                {"name": "roster", "type": "one_to_many"},
                {"name": "league", "type": "many_to_one"}
            ]
        })));
        let expected = [
            "class Team:",
            "    \"\"\"Plain data container for Team entities.\"\"\"",
            "    def __init__(self, **kwargs):",
            "        self.id = kwargs.get('id')",
            "        self.city = kwargs.get('city')  # string",
            "",
            "        self.roster = CollectionWrapper(self, 'roster')",
        ]
        .join("\n");
        assert_eq!(output.code, expected);
        assert!(output.failures.is_empty());
    }

    #[test]
    fn test_empty_entity_gets_pass() {
        let output = generate_entity(&entity(json!({"name": "Marker"})));
        assert!(output.code.ends_with("    def __init__(self, **kwargs):\n        pass"));
    }

    #[test]
    fn test_calculated_property() {
        let output = generate_entity(&entity(json!({
            "name": "Grid",
            "fields": [
                {"name": "Lx"},
                {"name": "half_width", "type": "calculated",
                 "formula": "DIVIDE(Lx, 2)", "description": "Half the grid width"}
            ]
        })));
        let property = [
            "    @property",
            "    def half_width(self):",
            "        \"\"\"Half the grid width",
            "        Original formula: DIVIDE(Lx, 2)",
            "        \"\"\"",
            "        return (self.Lx / 2)",
        ]
        .join("\n");
        assert!(output.code.contains(&property), "{}", output.code);
    }

    #[test]
    fn test_failed_formula_becomes_stub() {
        let output = generate_entity(&entity(json!({
            "name": "Grid",
            "aggregations": [
                {"name": "broken", "formula": "NOPE(x)", "description": ""},
                {"name": "fine", "formula": "ADD(a, b)", "description": ""}
            ]
        })));
        assert!(output.code.contains("        # Formula error: unknown function NOPE\n        return None"));
        assert!(output.code.contains("        return (self.a + self.b)"));
        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.failures[0].member, "broken");
    }

    #[test]
    fn test_derived_lookup() {
        let output = generate_entity(&entity(json!({
            "name": "Polygon",
            "lookups": [
                {"name": "edges", "type": "one_to_many"},
                {"name": "edge_lengths", "target_entity": "this", "join_condition": "this.edges.length"},
                {"name": "too_deep", "target_entity": "this", "join_condition": "this.edges.length.unit"}
            ]
        })));
        assert!(output.code.contains(
            "    def edge_lengths(self):\n        \"\"\"Derived from this.edges.length\"\"\"\n        return [item.length for item in self.edges]"
        ));
        assert!(output.code.contains("# Formula error: unsupported multi-dot reference 'this.edges.length.unit'"));
        assert_eq!(output.failures.len(), 1);
    }

    #[test]
    fn test_context_collects_dependencies() {
        let output = generate_entity(&entity(json!({
            "name": "Walk",
            "aggregations": [
                {"name": "shifted", "formula": "SHIFT(psi, offsets)"},
                {"name": "mean_runs", "formula": "AVG(games => runs)"}
            ]
        })));
        assert_eq!(output.context.building_blocks().collect::<Vec<_>>(), vec!["SHIFT"]);
        assert!(output.context.needs_statistics());
    }

    #[test]
    fn test_docstring_escaping() {
        assert_eq!(docstring_text("a \"\"\" b"), "a \\\"\\\"\\\" b");
        assert_eq!(docstring_text(r"a\b"), r"a\\b");
    }
}
