//! Terminal rendering of session output.

use itertools::Itertools;
use optimade_client::session::LabeledStructure;
use optimade_client::{PaginationSnapshot, ResultsView};
use tracing::trace;

use crate::utils::message;

/// Prints results to stdout and messages to stderr.
#[derive(Debug, Default)]
pub struct TerminalView {
    /// Print results as a JSON array of structure resources.
    pub json: bool,
    /// Suppress results, e.g. while paging to a requested page.
    pub hidden: bool,
}

impl TerminalView {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            hidden: false,
        }
    }
}

/// Numbered result labels, one per line.
pub(crate) fn render_labels(results: &[LabeledStructure]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(index, (label, _))| format!("{index:>4}  {label}"))
        .join("\n")
}

/// One line of pagination state, e.g. `Showing 1-25 of 30 results [next, last]`.
pub(crate) fn render_snapshot(snapshot: &PaginationSnapshot) -> String {
    let navigation = [
        (snapshot.first_enabled, "first"),
        (snapshot.prev_enabled, "prev"),
        (snapshot.next_enabled, "next"),
        (snapshot.last_enabled, "last"),
    ]
    .into_iter()
    .filter_map(|(enabled, name)| enabled.then_some(name))
    .join(", ");

    if navigation.is_empty() {
        snapshot.summary.clone()
    } else {
        format!("{} [{navigation}]", snapshot.summary)
    }
}

impl ResultsView for TerminalView {
    fn show_results(&mut self, results: &[LabeledStructure]) {
        if self.hidden {
            return;
        }
        if self.json {
            let structures = results.iter().map(|(_, structure)| structure).collect_vec();
            match serde_json::to_string_pretty(&structures) {
                Ok(json) => println!("{json}"),
                Err(err) => message::error(format!("couldn't serialize results: {err}")),
            }
            return;
        }

        if results.is_empty() {
            message::plain("No structures found.");
        } else {
            println!("{}", render_labels(results));
        }
    }

    fn show_message(&mut self, message: &str) {
        message::warning(message);
    }

    fn set_frozen(&mut self, frozen: bool) {
        // Nothing to disable on a terminal
        trace!(frozen, "terminal view");
    }
}

#[cfg(test)]
mod tests {
    use optimade_client::Structure;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::utils::message::history::History;

    fn structure(id: &str) -> Structure {
        Structure {
            id: id.to_string(),
            resource_type: "structures".to_string(),
            attributes: Default::default(),
        }
    }

    #[test]
    fn labels_are_numbered() {
        let results = vec![
            ("SiO2 (id: a)".to_string(), structure("a")),
            ("NaCl (id: b)".to_string(), structure("b")),
        ];
        assert_eq!(render_labels(&results), "   0  SiO2 (id: a)\n   1  NaCl (id: b)");
    }

    #[test]
    fn snapshot_lists_enabled_navigation() {
        let snapshot = PaginationSnapshot {
            summary: "Showing 1-25 of 30 results".to_string(),
            first_enabled: false,
            prev_enabled: false,
            next_enabled: true,
            last_enabled: true,
        };
        assert_eq!(
            render_snapshot(&snapshot),
            "Showing 1-25 of 30 results [next, last]"
        );
    }

    #[test]
    fn messages_go_to_stderr_as_warnings() {
        let history = History::global();
        history.clear();

        let mut view = TerminalView::new(false);
        view.show_message("Error during querying, please try again later.");
        view.show_results(&[]);

        assert_eq!(history.messages(), vec![
            "⚠️  Error during querying, please try again later.".to_string(),
            "No structures found.".to_string(),
        ]);
    }
}
