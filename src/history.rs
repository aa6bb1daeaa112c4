use crate::model::Annotation;

/// Linear undo history for one image slot: a list of annotation-set
/// snapshots and a cursor that always points at a valid entry. Pushing a new
/// snapshot after an undo discards the abandoned redo branch.
///
/// Snapshots are owned clones; the live set in the editor never aliases an
/// entry here.
#[derive(Clone, Debug)]
pub struct History {
    snapshots: Vec<Vec<Annotation>>,
    cursor: usize,
}

impl History {
    pub fn new(initial: Vec<Annotation>) -> Self {
        Self {
            snapshots: vec![initial],
            cursor: 0,
        }
    }

    /// Replaces the whole history with a single snapshot. Used when the
    /// active slot changes.
    pub fn reset(&mut self, initial: Vec<Annotation>) {
        self.snapshots = vec![initial];
        self.cursor = 0;
    }

    /// Truncates everything past the cursor, appends `snapshot`, and moves
    /// the cursor onto it.
    pub fn push(&mut self, snapshot: Vec<Annotation>) {
        self.snapshots.truncate(self.cursor + 1);
        self.snapshots.push(snapshot);
        self.cursor = self.snapshots.len() - 1;
    }

    /// Steps back one snapshot and returns a copy of it, or `None` at the
    /// oldest entry.
    pub fn undo(&mut self) -> Option<Vec<Annotation>> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        Some(self.snapshots[self.cursor].clone())
    }

    /// Steps forward one snapshot and returns a copy of it, or `None` at the
    /// newest entry.
    pub fn redo(&mut self) -> Option<Vec<Annotation>> {
        if self.cursor + 1 >= self.snapshots.len() {
            return None;
        }
        self.cursor += 1;
        Some(self.snapshots[self.cursor].clone())
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.snapshots.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Point, ShapeKind, DEFAULT_STROKE_WIDTH};

    fn shape(id: &str) -> Annotation {
        Annotation {
            id: id.to_string(),
            kind: ShapeKind::Rectangle,
            points: vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)],
            color: "#ef4444".to_string(),
            stroke_width: DEFAULT_STROKE_WIDTH,
            label_id: None,
        }
    }

    #[test]
    fn undo_walks_back_to_empty_and_redo_restores_in_order() {
        let mut history = History::default();
        let mut set = Vec::new();
        for i in 0..5 {
            set.push(shape(&i.to_string()));
            history.push(set.clone());
        }

        let mut state = set.clone();
        for _ in 0..5 {
            state = history.undo().expect("undo available");
        }
        assert!(state.is_empty());
        assert!(history.undo().is_none());

        for _ in 0..5 {
            state = history.redo().expect("redo available");
        }
        assert_eq!(state.len(), 5);
        let ids: Vec<&str> = state.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["0", "1", "2", "3", "4"]);
        assert!(history.redo().is_none());
    }

    #[test]
    fn push_after_undo_truncates_the_redo_branch() {
        // [∅, A, AB] at cursor 1 (state A), then commit C ⇒ [∅, A, AC].
        let a = shape("A");
        let b = shape("B");
        let c = shape("C");

        let mut history = History::default();
        history.push(vec![a.clone()]);
        history.push(vec![a.clone(), b]);

        let state = history.undo().unwrap();
        assert_eq!(state.len(), 1);

        history.push(vec![a.clone(), c.clone()]);
        assert_eq!(history.len(), 3);
        assert!(!history.can_redo());

        let state = history.undo().unwrap();
        assert_eq!(state, vec![a.clone()]);
        let state = history.redo().unwrap();
        assert_eq!(state, vec![a, c]);
        assert!(history.redo().is_none());
    }

    #[test]
    fn reset_leaves_one_snapshot() {
        let mut history = History::default();
        history.push(vec![shape("A")]);
        history.push(vec![shape("A"), shape("B")]);
        history.reset(vec![shape("X")]);
        assert!(!history.can_undo());
        assert!(!history.can_redo());
        assert_eq!(history.len(), 1);
    }
}
