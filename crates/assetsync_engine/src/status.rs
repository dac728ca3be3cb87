use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Directed graph of the statuses an asset version can occupy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFlow {
    default_status: String,
    transitions: BTreeMap<String, BTreeSet<String>>,
}

impl StatusFlow {
    pub fn new(default_status: impl Into<String>) -> Self {
        Self {
            default_status: default_status.into(),
            transitions: BTreeMap::new(),
        }
    }

    pub fn with_transition(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.transitions
            .entry(from.into())
            .or_default()
            .insert(to.into());
        self
    }

    pub fn default_status(&self) -> &str {
        &self.default_status
    }

    pub fn can_transition(&self, from: &str, to: &str) -> bool {
        self.transitions
            .get(from)
            .is_some_and(|targets| targets.contains(to))
    }

    /// Shortest sequence of statuses leading from `from` to `to`.
    ///
    /// `from` is excluded and `to` included; an empty path means already there.
    /// Ties are broken by status name so the result is deterministic.
    pub fn transition_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if from == to {
            return Some(Vec::new());
        }
        let mut previous: HashMap<&str, &str> = HashMap::new();
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            let Some(targets) = self.transitions.get(current) else {
                continue;
            };
            for next in targets {
                let next = next.as_str();
                if next == from || previous.contains_key(next) {
                    continue;
                }
                previous.insert(next, current);
                if next == to {
                    return Some(unwind(&previous, from, to));
                }
                queue.push_back(next);
            }
        }
        None
    }
}

fn unwind(previous: &HashMap<&str, &str>, from: &str, to: &str) -> Vec<String> {
    let mut path = vec![to.to_string()];
    let mut current = to;
    while let Some(&before) = previous.get(current) {
        if before == from {
            break;
        }
        path.push(before.to_string());
        current = before;
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::StatusFlow;

    fn review_flow() -> StatusFlow {
        StatusFlow::new("draft")
            .with_transition("draft", "in-review")
            .with_transition("in-review", "approved")
            .with_transition("in-review", "draft")
            .with_transition("approved", "published")
    }

    #[test]
    fn path_lists_every_intermediate_status() {
        let path = review_flow().transition_path("draft", "published").unwrap();
        assert_eq!(path, vec!["in-review", "approved", "published"]);
    }

    #[test]
    fn same_status_needs_no_transition() {
        assert_eq!(review_flow().transition_path("draft", "draft"), Some(vec![]));
    }

    #[test]
    fn unreachable_status_has_no_path() {
        assert_eq!(review_flow().transition_path("published", "draft"), None);
        assert_eq!(review_flow().transition_path("draft", "archived"), None);
    }

    #[test]
    fn shortest_path_wins() {
        let flow = review_flow().with_transition("draft", "approved");
        assert_eq!(
            flow.transition_path("draft", "published").unwrap(),
            vec!["approved", "published"]
        );
    }
}
