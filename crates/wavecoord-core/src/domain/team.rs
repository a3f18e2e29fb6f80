//! Team-side capacity/skill records and task-side requirements.

use serde::{Deserialize, Serialize};

pub use frontier_state::{TeamCapacity, TeamSkill};

/// A skill a task requires, with the floor proficiency and how much the
/// requirement matters to the match score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequirement {
    pub skill_id: String,
    /// Minimum acceptable proficiency, in [0,1].
    pub minimum_proficiency: f64,
    /// Weight of this requirement in the match score, in [0,1].
    pub importance: f64,
}

impl TaskRequirement {
    pub fn new(skill_id: impl Into<String>, minimum_proficiency: f64, importance: f64) -> Self {
        Self {
            skill_id: skill_id.into(),
            minimum_proficiency,
            importance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirement_constructor_sets_fields() {
        let req = TaskRequirement::new("rust", 0.6, 0.9);
        assert_eq!(req.skill_id, "rust");
        assert!((req.minimum_proficiency - 0.6).abs() < 1e-9);
        assert!((req.importance - 0.9).abs() < 1e-9);
    }
}
