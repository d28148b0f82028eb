use std::collections::BTreeSet;

/// Output of translating one formula, or one piece of one.
///
/// Besides the target code it carries the building blocks the code calls and
/// whether it needs the `statistics` module. Both are unioned upward as
/// fragments are combined.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CodeFragment {
    pub code: String,
    pub building_blocks: BTreeSet<String>,
    pub needs_statistics: bool,
}

impl CodeFragment {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Default::default()
        }
    }

    /// A fragment with the dependencies of every part in `parts`.
    pub fn combine<'a>(code: impl Into<String>, parts: impl IntoIterator<Item = &'a CodeFragment>) -> Self {
        let mut fragment = Self::new(code);
        for part in parts {
            fragment.absorb(part);
        }
        fragment
    }

    pub fn absorb(&mut self, other: &CodeFragment) {
        self.building_blocks.extend(other.building_blocks.iter().cloned());
        self.needs_statistics |= other.needs_statistics;
    }

    pub fn with_building_block(mut self, name: &str) -> Self {
        self.building_blocks.insert(name.to_string());
        self
    }

    pub fn with_statistics(mut self) -> Self {
        self.needs_statistics = true;
        self
    }
}

/// Run-scoped dependency tracker.
///
/// Every operation is a set union or a flag OR, so contexts built for
/// different entities can be merged in any order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompilerContext {
    building_blocks: BTreeSet<String>,
    needs_statistics: bool,
}

impl CompilerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, fragment: &CodeFragment) {
        self.building_blocks.extend(fragment.building_blocks.iter().cloned());
        self.needs_statistics |= fragment.needs_statistics;
    }

    pub fn merge(&mut self, other: &CompilerContext) {
        self.building_blocks.extend(other.building_blocks.iter().cloned());
        self.needs_statistics |= other.needs_statistics;
    }

    /// Detected building blocks, sorted.
    pub fn building_blocks(&self) -> impl Iterator<Item = &str> {
        self.building_blocks.iter().map(String::as_str)
    }

    pub fn has_building_blocks(&self) -> bool {
        !self.building_blocks.is_empty()
    }

    pub fn needs_statistics(&self) -> bool {
        self.needs_statistics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_unions_parts() {
        let a = CodeFragment::new("SHIFT(self.psi, self.o)").with_building_block("SHIFT");
        let b = CodeFragment::new("statistics.mean(self.xs)").with_statistics();
        let c = CodeFragment::combine("(a + b)", [&a, &b]);
        assert_eq!(c.code, "(a + b)");
        assert!(c.building_blocks.contains("SHIFT"));
        assert!(c.needs_statistics);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let mut first = CompilerContext::new();
        first.record(&CodeFragment::new("x").with_building_block("EVOLVE"));
        let mut second = CompilerContext::new();
        second.record(&CodeFragment::new("y").with_building_block("SHIFT").with_statistics());

        let mut left = first.clone();
        left.merge(&second);
        let mut right = second.clone();
        right.merge(&first);

        assert_eq!(left, right);
        assert_eq!(left.building_blocks().collect::<Vec<_>>(), vec!["EVOLVE", "SHIFT"]);
        assert!(left.needs_statistics());
    }
}
