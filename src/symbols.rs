//! Symbol table and "did-you-mean" suggestion machinery (spec §4.2, C2/C5).

use std::collections::BTreeMap;

use crate::ast::{Domain, TypeDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SymbolKind {
    Type,
    Entity,
    Behavior,
    Enum,
}

/// The built-in primitive type names every domain gets for free (spec §4.2).
pub const BUILTIN_PRIMITIVES: &[&str] = &[
    "String", "Int", "Decimal", "Boolean", "UUID", "Timestamp", "List", "Map", "Optional",
];

/// Built-in pure functions the expression encoder maps directly to SMT theory
/// operators rather than uninterpreted functions (spec §4.6).
pub const BUILTIN_FUNCTIONS: &[&str] = &[
    "abs",
    "min",
    "max",
    "length",
    "contains",
    "startsWith",
    "endsWith",
    "matches",
];

/// Maps every name declared at domain scope to its kind, plus the auxiliary lookup
/// tables the resolver, exhaustiveness, and consistency passes need: enum variant
/// lists, per-entity field sets, and per-behavior input/error name sets.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: BTreeMap<String, SymbolKind>,
    enum_variants: BTreeMap<String, Vec<String>>,
    entity_fields: BTreeMap<String, Vec<String>>,
    behavior_inputs: BTreeMap<String, Vec<String>>,
    behavior_errors: BTreeMap<String, Vec<String>>,
    struct_fields: BTreeMap<String, Vec<String>>,
}

impl SymbolTable {
    pub fn build(domain: &Domain) -> SymbolTable {
        let mut table = SymbolTable::default();

        for t in &domain.types {
            table.symbols.insert(t.name.clone(), SymbolKind::Type);
            match &t.def {
                TypeDef::Enum { variants } => {
                    table.symbols.insert(t.name.clone(), SymbolKind::Enum);
                    table.enum_variants.insert(t.name.clone(), variants.clone());
                }
                TypeDef::Struct { fields } => {
                    table.struct_fields.insert(
                        t.name.clone(),
                        fields.iter().map(|f| f.name.clone()).collect(),
                    );
                }
                _ => {}
            }
        }

        for e in &domain.entities {
            table.symbols.insert(e.name.clone(), SymbolKind::Entity);
            table
                .entity_fields
                .insert(e.name.clone(), e.fields.iter().map(|f| f.name.clone()).collect());
        }

        for b in &domain.behaviors {
            table.symbols.insert(b.name.clone(), SymbolKind::Behavior);
            table.behavior_inputs.insert(
                b.name.clone(),
                b.input.iter().map(|f| f.name.clone()).collect(),
            );
            table.behavior_errors.insert(
                b.name.clone(),
                b.output.errors.iter().map(|e| e.name.clone()).collect(),
            );
        }

        table
    }

    pub fn kind_of(&self, name: &str) -> Option<SymbolKind> {
        self.symbols.get(name).copied()
    }

    pub fn is_builtin_primitive(&self, name: &str) -> bool {
        BUILTIN_PRIMITIVES.contains(&name)
    }

    pub fn is_builtin_function(&self, name: &str) -> bool {
        BUILTIN_FUNCTIONS.contains(&name)
    }

    pub fn enum_variants(&self, enum_name: &str) -> Option<&[String]> {
        self.enum_variants.get(enum_name).map(|v| v.as_slice())
    }

    pub fn entity_fields(&self, entity_name: &str) -> Option<&[String]> {
        self.entity_fields.get(entity_name).map(|v| v.as_slice())
    }

    pub fn struct_fields(&self, type_name: &str) -> Option<&[String]> {
        self.struct_fields.get(type_name).map(|v| v.as_slice())
    }

    pub fn behavior_input_names(&self, behavior_name: &str) -> Option<&[String]> {
        self.behavior_inputs.get(behavior_name).map(|v| v.as_slice())
    }

    pub fn behavior_error_names(&self, behavior_name: &str) -> Option<&[String]> {
        self.behavior_errors.get(behavior_name).map(|v| v.as_slice())
    }

    pub fn names_of_kind(&self, kind: SymbolKind) -> Vec<&str> {
        self.symbols
            .iter()
            .filter(|(_, k)| **k == kind)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn all_type_names(&self) -> Vec<&str> {
        self.symbols
            .iter()
            .filter(|(_, k)| matches!(k, SymbolKind::Type | SymbolKind::Enum))
            .map(|(name, _)| name.as_str())
            .chain(BUILTIN_PRIMITIVES.iter().copied())
            .collect()
    }
}

/// Levenshtein edit distance, used by the resolver's "did you mean" suggestions
/// (spec §4.2: edit distance ≤ 2).
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (la, lb) = (a.len(), b.len());
    let mut prev: Vec<usize> = (0..=lb).collect();
    let mut cur = vec![0usize; lb + 1];

    for i in 1..=la {
        cur[0] = i;
        for j in 1..=lb {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[lb]
}

/// Finds the closest candidate(s) to `name` within edit distance 2, from the symbol
/// class the reference context expects — a behavior-slot typo never suggests a type
/// name because the caller only passes the type-name candidate set (spec §4.2).
pub fn suggest<'a>(name: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    candidates
        .into_iter()
        .map(|c| (edit_distance(name, c), c))
        .filter(|(d, _)| *d <= 2)
        .min_by_key(|(d, c)| (*d, c.len()))
        .map(|(_, c)| c)
}

/// True when `name` is a case-only variant of a builtin primitive (e.g. `string` vs
/// `String`) — the resolver attaches a dedicated help line for this case (spec §4.2).
pub fn is_case_flipped_builtin(name: &str) -> Option<&'static str> {
    BUILTIN_PRIMITIVES
        .iter()
        .find(|b| b.eq_ignore_ascii_case(name) && **b != name)
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_distance_identical_is_zero() {
        assert_eq!(edit_distance("amount", "amount"), 0);
    }

    #[test]
    fn edit_distance_single_typo() {
        assert_eq!(edit_distance("amuont", "amount"), 2);
        assert_eq!(edit_distance("amount", "amounts"), 1);
    }

    #[test]
    fn suggest_picks_closest_within_radius() {
        let candidates = ["amount", "account", "total"];
        assert_eq!(suggest("amuont", candidates), Some("amount"));
        assert_eq!(suggest("zzzzzzzzzz", candidates), None);
    }

    #[test]
    fn case_flipped_builtin_detected() {
        assert_eq!(is_case_flipped_builtin("string"), Some("String"));
        assert_eq!(is_case_flipped_builtin("String"), None);
        assert_eq!(is_case_flipped_builtin("Strng"), None);
    }
}
