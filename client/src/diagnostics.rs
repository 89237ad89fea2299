//! Diagnostics store: latest diagnostics per resource and pass.

use std::collections::{BTreeMap, HashMap};

use tslink_types::{DiagnosticKind, TsDiagnostic};

use crate::types::DiagnosticsSnapshot;

pub(crate) struct DiagnosticsStore {
    data: HashMap<String, BTreeMap<DiagnosticKind, Vec<TsDiagnostic>>>,
}

impl DiagnosticsStore {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    /// Replace one pass's diagnostics for `resource`.
    pub fn update(&mut self, resource: &str, kind: DiagnosticKind, items: Vec<TsDiagnostic>) {
        if items.is_empty() {
            if let Some(passes) = self.data.get_mut(resource) {
                passes.remove(&kind);
                if passes.is_empty() {
                    self.data.remove(resource);
                }
            }
        } else {
            self.data
                .entry(resource.to_string())
                .or_default()
                .insert(kind, items);
        }
    }

    /// Forget everything known about a closed document.
    pub fn remove(&mut self, resource: &str) {
        self.data.remove(resource);
    }

    /// Drop all diagnostics, e.g. when the worker that produced them died.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        // BTreeMap order yields syntax, then semantic, then suggestion.
        let mut files: Vec<(String, Vec<TsDiagnostic>)> = self
            .data
            .iter()
            .map(|(resource, passes)| {
                (
                    resource.clone(),
                    passes.values().flatten().cloned().collect(),
                )
            })
            .collect();

        // Sort: files with errors first, then alphabetically
        files.sort_by(|a, b| {
            let a_has_errors = a.1.iter().any(|d| d.category().is_error());
            let b_has_errors = b.1.iter().any(|d| d.category().is_error());
            b_has_errors.cmp(&a_has_errors).then_with(|| a.0.cmp(&b.0))
        });

        DiagnosticsSnapshot::new(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_diag(category: &str, text: &str) -> TsDiagnostic {
        TsDiagnostic {
            start: None,
            end: None,
            text: text.to_string(),
            code: None,
            category: category.to_string(),
            source: None,
        }
    }

    #[test]
    fn test_empty_snapshot() {
        let store = DiagnosticsStore::new();
        let snap = store.snapshot();
        assert!(snap.is_empty());
        assert_eq!(snap.error_count(), 0);
    }

    #[test]
    fn test_passes_are_merged_in_order() {
        let mut store = DiagnosticsStore::new();
        store.update(
            "file:///a.ts",
            DiagnosticKind::Suggestion,
            vec![make_diag("suggestion", "convert to async")],
        );
        store.update(
            "file:///a.ts",
            DiagnosticKind::Syntax,
            vec![make_diag("error", "';' expected")],
        );
        store.update(
            "file:///a.ts",
            DiagnosticKind::Semantic,
            vec![make_diag("warning", "unused")],
        );

        let snap = store.snapshot();
        let texts: Vec<&str> = snap.files()[0].1.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["';' expected", "unused", "convert to async"]);
    }

    #[test]
    fn test_each_pass_replaces_only_itself() {
        let mut store = DiagnosticsStore::new();
        store.update(
            "file:///a.ts",
            DiagnosticKind::Syntax,
            vec![make_diag("error", "e1")],
        );
        store.update(
            "file:///a.ts",
            DiagnosticKind::Semantic,
            vec![make_diag("error", "e2"), make_diag("error", "e3")],
        );
        assert_eq!(store.snapshot().error_count(), 3);

        store.update(
            "file:///a.ts",
            DiagnosticKind::Semantic,
            vec![make_diag("error", "e2")],
        );
        assert_eq!(store.snapshot().error_count(), 2);
    }

    #[test]
    fn test_empty_update_removes_resource() {
        let mut store = DiagnosticsStore::new();
        store.update(
            "file:///a.ts",
            DiagnosticKind::Semantic,
            vec![make_diag("error", "e")],
        );
        store.update("file:///a.ts", DiagnosticKind::Semantic, vec![]);
        assert!(store.snapshot().is_empty());

        // Clearing a pass that was never reported is a no-op.
        store.update("file:///b.ts", DiagnosticKind::Syntax, vec![]);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_errors_first_sorting() {
        let mut store = DiagnosticsStore::new();
        store.update(
            "file:///b.ts",
            DiagnosticKind::Semantic,
            vec![make_diag("warning", "warn")],
        );
        store.update(
            "file:///a.ts",
            DiagnosticKind::Semantic,
            vec![make_diag("warning", "warn")],
        );
        store.update(
            "file:///c.ts",
            DiagnosticKind::Semantic,
            vec![make_diag("error", "err")],
        );

        let snap = store.snapshot();
        let order: Vec<&str> = snap.files().iter().map(|(r, _)| r.as_str()).collect();
        assert_eq!(order, vec!["file:///c.ts", "file:///a.ts", "file:///b.ts"]);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut store = DiagnosticsStore::new();
        for resource in ["file:///a.ts", "file:///b.ts"] {
            store.update(resource, DiagnosticKind::Syntax, vec![make_diag("error", "e")]);
        }
        store.remove("file:///a.ts");
        assert_eq!(store.snapshot().files().len(), 1);

        store.clear();
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_status_string() {
        let mut store = DiagnosticsStore::new();
        assert_eq!(store.snapshot().status_string(), "");

        store.update(
            "file:///a.ts",
            DiagnosticKind::Semantic,
            vec![
                make_diag("error", "e"),
                make_diag("warning", "w"),
                make_diag("warning", "w2"),
            ],
        );
        assert_eq!(store.snapshot().status_string(), "E:1 W:2");
    }
}
