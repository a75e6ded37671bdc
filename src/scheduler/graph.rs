//! Prerequisite graph over the chapters of one curriculum.
//!
//! Builds index-based prerequisite edges and validates references:
//! duplicate ids and prerequisites naming unknown chapters are rejected.
//! Cycles are deliberately *not* rejected: a cyclic curriculum must reach
//! the scheduler so it can terminate with a stall report instead of an
//! ingestion error, and the same code path then covers graphs that become
//! unsatisfiable at run time.

use crate::curriculum::ChapterSpec;
use crate::errors::SynthesisError;
use std::collections::{BTreeSet, HashMap};

/// Index into the curriculum's chapter list.
pub type ChapterIndex = usize;

/// Directed prerequisite graph, preserving curriculum order.
#[derive(Debug)]
pub struct ChapterGraph {
    chapters: Vec<ChapterSpec>,
    index_map: HashMap<String, ChapterIndex>,
    /// For each chapter, the indices it must wait for.
    prerequisites: Vec<Vec<ChapterIndex>>,
}

impl ChapterGraph {
    /// Build and validate the graph.
    pub fn build(chapters: &[ChapterSpec]) -> Result<Self, SynthesisError> {
        if chapters.is_empty() {
            return Err(SynthesisError::EmptyCurriculum);
        }

        let mut index_map = HashMap::new();
        for (i, chapter) in chapters.iter().enumerate() {
            if index_map.insert(chapter.id.clone(), i).is_some() {
                return Err(SynthesisError::DuplicateChapter(chapter.id.clone()));
            }
        }

        let mut prerequisites: Vec<Vec<ChapterIndex>> = vec![Vec::new(); chapters.len()];
        for (i, chapter) in chapters.iter().enumerate() {
            for prereq in &chapter.prerequisite_ids {
                let Some(&dep) = index_map.get(prereq) else {
                    return Err(SynthesisError::UnknownPrerequisite {
                        chapter: chapter.id.clone(),
                        prerequisite: prereq.clone(),
                    });
                };
                prerequisites[i].push(dep);
            }
        }

        Ok(Self {
            chapters: chapters.to_vec(),
            index_map,
            prerequisites,
        })
    }

    /// Number of chapters.
    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    /// Chapters in curriculum order.
    pub fn chapters(&self) -> &[ChapterSpec] {
        &self.chapters
    }

    /// A chapter by index.
    pub fn chapter(&self, index: ChapterIndex) -> &ChapterSpec {
        &self.chapters[index]
    }

    /// Index of a chapter id.
    pub fn index_of(&self, id: &str) -> Option<ChapterIndex> {
        self.index_map.get(id).copied()
    }

    /// Prerequisite indices of a chapter.
    pub fn prerequisites(&self, index: ChapterIndex) -> &[ChapterIndex] {
        self.prerequisites.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Check if every prerequisite of `index` is in the completed set.
    pub fn prerequisites_met(&self, index: ChapterIndex, completed: &BTreeSet<String>) -> bool {
        self.prerequisites(index)
            .iter()
            .all(|&dep| completed.contains(&self.chapters[dep].id))
    }

    /// Find a transitive prerequisite of `index` in `blocked`, if any.
    ///
    /// Used for stall reporting: a chapter downstream of a permanently
    /// failed one is unresolved because of that ancestor.
    pub fn blocking_ancestor(
        &self,
        index: ChapterIndex,
        blocked: &BTreeSet<String>,
    ) -> Option<String> {
        let mut visited = vec![false; self.chapters.len()];
        let mut stack = vec![index];
        visited[index] = true;

        while let Some(node) = stack.pop() {
            for &dep in self.prerequisites(node) {
                if visited[dep] {
                    continue;
                }
                visited[dep] = true;
                let id = &self.chapters[dep].id;
                if blocked.contains(id) {
                    return Some(id.clone());
                }
                stack.push(dep);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(id: &str, prereqs: Vec<&str>) -> ChapterSpec {
        ChapterSpec {
            id: id.to_string(),
            title: format!("Chapter {id}"),
            learning_objectives: Vec::new(),
            topics: Vec::new(),
            prerequisite_ids: prereqs.into_iter().map(String::from).collect(),
        }
    }

    fn completed(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_build_diamond() {
        let graph = ChapterGraph::build(&[
            chapter("a", vec![]),
            chapter("b", vec!["a"]),
            chapter("c", vec!["a"]),
            chapter("d", vec!["b", "c"]),
        ])
        .unwrap();

        assert_eq!(graph.len(), 4);
        assert_eq!(graph.prerequisites(0), &[] as &[usize]);
        assert_eq!(graph.prerequisites(3), &[1, 2]);
        assert_eq!(graph.index_of("c"), Some(2));
    }

    #[test]
    fn test_prerequisites_met_progression() {
        let graph = ChapterGraph::build(&[
            chapter("a", vec![]),
            chapter("b", vec!["a"]),
            chapter("c", vec!["a", "b"]),
        ])
        .unwrap();

        assert!(graph.prerequisites_met(0, &completed(&[])));
        assert!(!graph.prerequisites_met(1, &completed(&[])));
        assert!(graph.prerequisites_met(1, &completed(&["a"])));
        assert!(!graph.prerequisites_met(2, &completed(&["a"])));
        assert!(graph.prerequisites_met(2, &completed(&["a", "b"])));
    }

    #[test]
    fn test_empty_curriculum_rejected() {
        assert!(matches!(
            ChapterGraph::build(&[]),
            Err(SynthesisError::EmptyCurriculum)
        ));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let result = ChapterGraph::build(&[chapter("a", vec![]), chapter("a", vec![])]);
        assert!(matches!(result, Err(SynthesisError::DuplicateChapter(id)) if id == "a"));
    }

    #[test]
    fn test_unknown_prerequisite_rejected() {
        let result = ChapterGraph::build(&[chapter("a", vec!["ghost"])]);
        assert!(matches!(
            result,
            Err(SynthesisError::UnknownPrerequisite { prerequisite, .. }) if prerequisite == "ghost"
        ));
    }

    #[test]
    fn test_cycles_build_successfully() {
        let graph =
            ChapterGraph::build(&[chapter("a", vec!["b"]), chapter("b", vec!["a"])]).unwrap();
        // Neither chapter can ever become ready.
        assert!(!graph.prerequisites_met(0, &completed(&[])));
        assert!(!graph.prerequisites_met(1, &completed(&[])));
    }

    #[test]
    fn test_blocking_ancestor_is_transitive() {
        let graph = ChapterGraph::build(&[
            chapter("a", vec![]),
            chapter("b", vec!["a"]),
            chapter("c", vec!["b"]),
        ])
        .unwrap();

        let blocked = completed(&["a"]);
        assert_eq!(
            graph.blocking_ancestor(2, &blocked),
            Some("a".to_string())
        );
        assert_eq!(graph.blocking_ancestor(0, &blocked), None);
    }

    #[test]
    fn test_blocking_ancestor_none_when_clear() {
        let graph =
            ChapterGraph::build(&[chapter("a", vec![]), chapter("b", vec!["a"])]).unwrap();
        assert_eq!(graph.blocking_ancestor(1, &BTreeSet::new()), None);
    }
}
