use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Accepted argument counts for a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Inclusive range. `usize::MAX` as `max` means unbounded.
    Range { min: usize, max: usize },
    /// An explicit list of accepted counts, ascending.
    Forms(&'static [usize]),
}

impl Arity {
    pub fn min(&self) -> usize {
        match self {
            Arity::Range { min, .. } => *min,
            Arity::Forms(forms) => forms.first().copied().unwrap_or(0),
        }
    }

    pub fn max(&self) -> usize {
        match self {
            Arity::Range { max, .. } => *max,
            Arity::Forms(forms) => forms.last().copied().unwrap_or(0),
        }
    }

    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Arity::Range { min, max } => (*min..=*max).contains(&count),
            Arity::Forms(forms) => forms.contains(&count),
        }
    }
}

/// How the parser feeds a call's arguments into the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    /// Every argument is translated and substituted by position.
    Positional,
    /// `(collection, member)`: the collection is translated, the member is a raw name.
    CollectionField,
    /// One positional argument plus an optional trailing `axis=N`.
    AxisKeyword,
    /// One positional argument plus required `axis=A` and `index=I`.
    SliceKeywords,
    /// An external function, re-emitted by name and tracked as a dependency.
    BuildingBlock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub name: &'static str,
    pub arity: Arity,
    pub template: &'static str,
    pub shape: CallShape,
}

impl FunctionSignature {
    pub fn min_arity(&self) -> usize {
        self.arity.min()
    }

    pub fn max_arity(&self) -> usize {
        self.arity.max()
    }

    pub fn is_building_block(&self) -> bool {
        self.shape == CallShape::BuildingBlock
    }

    /// Fills `{0}`, `{1}`… from `args`, `{*}` with every argument, and any
    /// other `{key}` from `named`. Unknown keys are dropped.
    pub fn fill(&self, args: &[String], named: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(self.template.len() + 16);
        let mut rest = self.template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else {
                out.push_str(&rest[open..]);
                return out;
            };
            let key = &after[..close];
            if key == "*" {
                out.push_str(&args.join(", "));
            } else if let Ok(index) = key.parse::<usize>() {
                if let Some(arg) = args.get(index) {
                    out.push_str(arg);
                }
            } else if let Some((_, value)) = named.iter().find(|(k, _)| *k == key) {
                out.push_str(value);
            }
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        out
    }
}

/// Names of the external building blocks the generated code imports.
pub const BUILDING_BLOCKS: &[&str] = &[
    "SHIFT",
    "APPLY_BARRIER",
    "COLLAPSE_BARRIER",
    "GAUSSIAN_IN_Y_AND_UNIFORM_IN_X_AND_DIRECTION",
    "EVOLVE",
];

const fn exactly(n: usize) -> Arity {
    Arity::Range { min: n, max: n }
}

const fn sig(name: &'static str, arity: Arity, template: &'static str, shape: CallShape) -> FunctionSignature {
    FunctionSignature {
        name,
        arity,
        template,
        shape,
    }
}

fn build_table() -> BTreeMap<&'static str, FunctionSignature> {
    use CallShape::*;

    let signatures = [
        // arithmetic
        sig("ADD", exactly(2), "({0} + {1})", Positional),
        sig("SUBTRACT", exactly(2), "({0} - {1})", Positional),
        sig("MULTIPLY", exactly(2), "({0} * {1})", Positional),
        sig("DIVIDE", exactly(2), "({0} / {1})", Positional),
        sig("POWER", exactly(2), "({0} ** {1})", Positional),
        sig("FLOOR", exactly(1), "math.floor({0})", Positional),
        sig("ABS", exactly(1), "np.abs({0})", Positional),
        sig("SQRT", exactly(1), "np.sqrt({0})", Positional),
        sig("LEN", exactly(1), "len({0})", Positional),
        // comparison
        sig("EQUAL", exactly(2), "np.allclose({0}, {1})", Positional),
        sig("IF", exactly(3), "({1} if {0} else {2})", Positional),
        // linear algebra
        sig("TRANSPOSE", exactly(1), "{0}.T", Positional),
        sig("CONJUGATE_TRANSPOSE", exactly(1), "{0}.conj().T", Positional),
        sig("IDENTITY", exactly(1), "np.eye({0}, dtype=np.complex128)", Positional),
        sig("MATMUL", exactly(2), "np.matmul({0}, {1})", Positional),
        // collection shortcuts
        sig("SUM_OVER", exactly(2), "sum({var}.{1} for {var} in {0})", CollectionField),
        sig("MAX_OVER", exactly(2), "max({var}.{1} for {var} in {0})", CollectionField),
        // keyword forms
        sig("SUM", Arity::Range { min: 1, max: 2 }, "np.sum({0}{axis})", AxisKeyword),
        sig("SLICE", exactly(3), "np.take({0}, {index}, axis={axis})", SliceKeywords),
        // building blocks
        sig("SHIFT", exactly(2), "SHIFT({*})", BuildingBlock),
        sig("APPLY_BARRIER", exactly(6), "APPLY_BARRIER({*})", BuildingBlock),
        sig("COLLAPSE_BARRIER", exactly(6), "COLLAPSE_BARRIER({*})", BuildingBlock),
        sig(
            "GAUSSIAN_IN_Y_AND_UNIFORM_IN_X_AND_DIRECTION",
            exactly(5),
            "GAUSSIAN_IN_Y_AND_UNIFORM_IN_X_AND_DIRECTION({*})",
            BuildingBlock,
        ),
        sig("EVOLVE", Arity::Forms(&[4, 10, 11]), "EVOLVE({*})", BuildingBlock),
    ];

    signatures.into_iter().map(|s| (s.name, s)).collect()
}

fn table() -> &'static BTreeMap<&'static str, FunctionSignature> {
    static TABLE: OnceLock<BTreeMap<&'static str, FunctionSignature>> = OnceLock::new();
    TABLE.get_or_init(build_table)
}

/// Case-insensitive signature lookup.
pub fn lookup(name: &str) -> Option<&'static FunctionSignature> {
    table().get(name.to_ascii_uppercase().as_str())
}

/// Every registered signature, ordered by name.
pub fn all() -> impl Iterator<Item = &'static FunctionSignature> {
    table().values()
}
