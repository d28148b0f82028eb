use crate::codegen::{generate_entity, EntityOutput, FormulaFailure};
use crate::config::GeneratorConfig;
use crate::context::CompilerContext;
use crate::models::Rulebook;

const HELPERS: &str = r#"import uuid

# Append-only, insertion-ordered collection so callers can do obj.items.add(x).
class CollectionWrapper:
    def __init__(self, parent_object, attr_name):
        self.parent_object = parent_object
        self.attr_name = attr_name
        if not hasattr(parent_object, '_collections'):
            parent_object._collections = {}
        if attr_name not in parent_object._collections:
            parent_object._collections[attr_name] = []

    def add(self, item):
        self.parent_object._collections[self.attr_name].append(item)

    def __iter__(self):
        return iter(self.parent_object._collections[self.attr_name])

    def __len__(self):
        return len(self.parent_object._collections[self.attr_name])

    def __getitem__(self, index):
        return self.parent_object._collections[self.attr_name][index]


def _auto_id():
    """Generate an ID for objects created without one."""
    return str(uuid.uuid4())
"#;

const SAMPLE_MAIN: &str = r#"def sample_main():
    """
    Minimal demonstration of how to use the generated classes.
    """
    print("sample_main() not fully implemented. Please fill in your usage.")


if __name__ == "__main__":
    sample_main()
"#;

pub const CLASSES_MARKER: &str = "# ----- Generated classes below -----";

/// A complete generated module.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedModule {
    pub source: String,
    pub context: CompilerContext,
    pub failures: Vec<FormulaFailure>,
}

impl GeneratedModule {
    /// Detected building blocks, sorted.
    pub fn building_blocks(&self) -> Vec<&str> {
        self.context.building_blocks().collect()
    }
}

/// Compiles every entity and merges the per-entity contexts in schema order.
pub fn compile_entities(rulebook: &Rulebook) -> (Vec<EntityOutput>, CompilerContext) {
    let outputs: Vec<EntityOutput> = rulebook.entities.iter().map(generate_entity).collect();
    let mut context = CompilerContext::new();
    for output in &outputs {
        context.merge(&output.context);
    }
    (outputs, context)
}

fn import_lines(context: &CompilerContext, config: &GeneratorConfig) -> Vec<String> {
    let mut lines = vec!["import math".to_string(), "import numpy as np".to_string()];
    if context.needs_statistics() {
        lines.push("import statistics".to_string());
    }
    if context.has_building_blocks() {
        let blocks: Vec<&str> = context.building_blocks().collect();
        lines.push(format!(
            "from {} import {}",
            config.building_block_module,
            blocks.join(", ")
        ));
    }
    lines
}

/// Assembles the output module: header, imports, helper, classes and the
/// optional entry point.
pub fn generate_module(rulebook: &Rulebook, config: &GeneratorConfig) -> GeneratedModule {
    let (outputs, context) = compile_entities(rulebook);

    let mut lines: Vec<String> = Vec::new();
    lines.push("\"\"\"".to_string());
    lines.extend(config.header.lines().map(str::to_string));
    lines.push("\"\"\"".to_string());
    lines.extend(import_lines(&context, config));
    lines.push(String::new());
    lines.push(String::new());
    lines.push(HELPERS.to_string());
    lines.push(String::new());
    lines.push(CLASSES_MARKER.to_string());
    lines.push(String::new());

    for output in &outputs {
        lines.push(output.code.clone());
        lines.push(String::new());
        lines.push(String::new());
    }

    if config.include_sample_main {
        lines.push(SAMPLE_MAIN.to_string());
    }

    let failures: Vec<FormulaFailure> = outputs.into_iter().flat_map(|o| o.failures).collect();
    log::info!(
        "generated {} entities ({} formulas, {} failed)",
        rulebook.entities.len(),
        rulebook.formula_count(),
        failures.len()
    );

    let mut source = lines.join("\n");
    while source.ends_with("\n\n") {
        source.pop();
    }
    if !source.ends_with('\n') {
        source.push('\n');
    }

    GeneratedModule {
        source,
        context,
        failures,
    }
}
