// THEORY:
// Detector labels come from an uncontrolled vocabulary: different model
// revisions say "cocoon", "Cocoons", "koza" or "koza_cocoon" for the same thing.
// Rather than pinning an enum to one model's class list, the engine sorts labels
// into the few biologically meaningful buckets it cares about with a permissive
// keyword match (exact aliases first, then substrings).
//
// These rules are heuristic and openly extensible. A label may fall into more
// than one bucket; each predicate is independent.

/// The biologically meaningful buckets a detector label can fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelCategory {
    Cocoon,
    Larva,
    Disease,
}

const COCOON_EXACT: &[&str] = &["cocoon", "cocoons", "koza", "koza_cocoon"];
const COCOON_FRAGMENTS: &[&str] = &["cocoon", "koza"];

const LARVA_EXACT: &[&str] = &["larva", "larvae", "kurt", "bocek", "böcek"];
const LARVA_FRAGMENTS: &[&str] = &["larva"];

const DISEASE_EXACT: &[&str] = &["diseased", "disease", "hasta", "hastalik"];
const DISEASE_FRAGMENTS: &[&str] = &["diseas", "hasta"];

fn matches_keywords(label: &str, exact: &[&str], fragments: &[&str]) -> bool {
    let normalized = label.trim().to_lowercase();
    if normalized.is_empty() {
        return false;
    }
    exact.contains(&normalized.as_str()) || fragments.iter().any(|f| normalized.contains(f))
}

pub fn is_cocoon_label(label: &str) -> bool {
    matches_keywords(label, COCOON_EXACT, COCOON_FRAGMENTS)
}

pub fn is_larva_label(label: &str) -> bool {
    matches_keywords(label, LARVA_EXACT, LARVA_FRAGMENTS)
}

pub fn is_disease_label(label: &str) -> bool {
    matches_keywords(label, DISEASE_EXACT, DISEASE_FRAGMENTS)
}

/// Every bucket the label matches, in a fixed order.
pub fn categorize(label: &str) -> Vec<LabelCategory> {
    let mut categories = Vec::with_capacity(3);
    if is_cocoon_label(label) {
        categories.push(LabelCategory::Cocoon);
    }
    if is_larva_label(label) {
        categories.push(LabelCategory::Larva);
    }
    if is_disease_label(label) {
        categories.push(LabelCategory::Disease);
    }
    categories
}
