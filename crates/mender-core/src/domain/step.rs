//! Step identity: the closed, ordered set of pipeline steps.

use std::fmt;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A pipeline step identifier.
///
/// Implemented by a fieldless enum. `ALL` fixes the execution order:
/// the step after `ALL[i]` on success is `ALL[i + 1]`, and the last entry
/// is the terminal step.
///
/// # 使用例
/// ```ignore
/// #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
/// enum Deploy { Build, Ship }
///
/// impl Step for Deploy {
///     const ALL: &'static [Self] = &[Deploy::Build, Deploy::Ship];
///     fn name(&self) -> &'static str { ... }
/// }
/// ```
pub trait Step:
    Copy + Eq + Hash + fmt::Debug + fmt::Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const ALL: &'static [Self];

    /// Stable name used in logs, diagnostics and the registry.
    fn name(&self) -> &'static str;

    fn first() -> Option<Self> {
        Self::ALL.first().copied()
    }

    fn position(&self) -> Option<usize> {
        Self::ALL.iter().position(|s| s == self)
    }

    /// Next step on success, `None` for the terminal step.
    fn next(&self) -> Option<Self> {
        self.position().and_then(|i| Self::ALL.get(i + 1).copied())
    }

    fn is_terminal(&self) -> bool {
        self.next().is_none()
    }
}

/// The step slot of a workflow: either the reserved idle value or a step.
///
/// Serialized as `"idle"` or `{"step": "<name>"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveStep<S> {
    Idle,
    Step(S),
}

impl<S: Step> ActiveStep<S> {
    pub fn is_idle(&self) -> bool {
        matches!(self, ActiveStep::Idle)
    }

    pub fn step(&self) -> Option<S> {
        match self {
            ActiveStep::Idle => None,
            ActiveStep::Step(s) => Some(*s),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActiveStep::Idle => "idle",
            ActiveStep::Step(s) => s.name(),
        }
    }
}

impl<S: Step> fmt::Display for ActiveStep<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Letter;

    #[test]
    fn order_follows_all() {
        assert_eq!(Letter::first(), Some(Letter::A));
        assert_eq!(Letter::A.next(), Some(Letter::B));
        assert_eq!(Letter::E.next(), Some(Letter::F));
        assert_eq!(Letter::F.next(), None);
        assert!(Letter::F.is_terminal());
        assert!(!Letter::C.is_terminal());
    }

    #[test]
    fn active_step_serializes_idle_as_string() {
        let idle: ActiveStep<Letter> = ActiveStep::Idle;
        assert_eq!(serde_json::to_string(&idle).unwrap(), "\"idle\"");

        let c = ActiveStep::Step(Letter::C);
        let v: serde_json::Value = serde_json::to_value(c).unwrap();
        assert_eq!(v["step"], "c");

        let back: ActiveStep<Letter> = serde_json::from_value(v).unwrap();
        assert_eq!(back, c);
    }
}
