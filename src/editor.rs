use std::collections::BTreeMap;

use serde_json::Value;

use crate::history::History;
use crate::model::{
    fresh_annotation_id, Annotation, AnnotationDocument, Point, ShapeKind, Slot,
    StoredAnnotations, DEFAULT_CONDITION, DEFAULT_STROKE_WIDTH, PALETTE,
};

/// Lifecycle of one pointer gesture. Freehand accumulates the whole path;
/// the two-point shapes only need the anchor.
#[derive(Clone, Debug, PartialEq)]
pub enum Drag {
    Idle,
    Drawing { anchor: Point, path: Vec<Point> },
}

/// The annotation editor's state machine, kept free of egui so the whole
/// contract is testable headless. The per-slot annotation map is the single
/// source of truth; the active slot's entry is what the canvas shows.
pub struct EditorState {
    active_slot: Slot,
    tool: ShapeKind,
    pub color: String,
    pub label: String,
    images: BTreeMap<Slot, String>,
    annotations: BTreeMap<Slot, Vec<Annotation>>,
    annotated_images: BTreeMap<Slot, String>,
    histories: BTreeMap<Slot, History>,
    drag: Drag,
    dirty: bool,
    /// Bumped on every edit so a save completion can tell whether the
    /// editor still matches what was sent to the store.
    revision: u64,
    /// Single-image legacy session: no slot switcher is offered.
    legacy: bool,
}

impl EditorState {
    /// Initialization contract: seed from the record's source images and,
    /// when present, its previously stored annotation payload. A payload
    /// that fails to decode leaves the editor empty rather than failing.
    pub fn open(images: BTreeMap<Slot, String>, stored: Option<&Value>) -> Self {
        let decoded = stored.map(StoredAnnotations::decode);
        let mut editor = Self {
            active_slot: Slot::Primary,
            tool: ShapeKind::Rectangle,
            color: PALETTE[0].to_string(),
            label: DEFAULT_CONDITION.to_string(),
            images,
            annotations: BTreeMap::new(),
            annotated_images: BTreeMap::new(),
            histories: BTreeMap::new(),
            drag: Drag::Idle,
            dirty: false,
            revision: 0,
            legacy: false,
        };

        match decoded {
            Some(StoredAnnotations::Document(doc)) => {
                if !doc.images.is_empty() {
                    editor.images = doc.images;
                }
                editor.annotations = doc.annotations;
                editor.annotated_images = doc.annotated_images;
            }
            Some(StoredAnnotations::Legacy(shapes)) => {
                editor.legacy = true;
                let slot = editor.first_available().unwrap_or(Slot::Primary);
                editor.annotations.insert(slot, shapes);
            }
            Some(StoredAnnotations::Empty) | None => {}
        }

        editor.active_slot = editor.first_available().unwrap_or(Slot::Primary);
        let initial = editor.active_set().to_vec();
        editor
            .histories
            .insert(editor.active_slot, History::new(initial));
        editor
    }

    fn first_available(&self) -> Option<Slot> {
        Slot::ALL.into_iter().find(|s| self.images.contains_key(s))
    }

    pub fn active_slot(&self) -> Slot {
        self.active_slot
    }

    pub fn tool(&self) -> ShapeKind {
        self.tool
    }

    pub fn set_tool(&mut self, tool: ShapeKind) {
        self.tool = tool;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Current edit revision; capture it when a save is requested and hand
    /// it back to [`EditorState::mark_saved`] on completion.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.revision += 1;
    }

    pub fn drag(&self) -> &Drag {
        &self.drag
    }

    pub fn active_set(&self) -> &[Annotation] {
        self.annotations
            .get(&self.active_slot)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn active_image(&self) -> Option<&str> {
        self.images.get(&self.active_slot).map(String::as_str)
    }

    /// Slots the toolbar offers, in priority order. A legacy session has a
    /// single slot and no switcher.
    pub fn selectable_slots(&self) -> Vec<Slot> {
        if self.legacy {
            return Vec::new();
        }
        Slot::ALL
            .into_iter()
            .filter(|s| self.images.contains_key(s))
            .collect()
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    fn history_mut(&mut self) -> &mut History {
        self.histories.entry(self.active_slot).or_default()
    }

    pub fn can_undo(&self) -> bool {
        self.histories
            .get(&self.active_slot)
            .is_some_and(History::can_undo)
    }

    pub fn can_redo(&self) -> bool {
        self.histories
            .get(&self.active_slot)
            .is_some_and(History::can_redo)
    }

    /// Switches the active slot. Edits on the previous slot stay in the
    /// per-slot map; the target's history restarts at its stored set.
    /// Returns the slot's source image reference for the canvas to load.
    pub fn switch_slot(&mut self, slot: Slot) -> Option<String> {
        let source = self.images.get(&slot)?.clone();
        self.active_slot = slot;
        self.drag = Drag::Idle;
        let initial = self.active_set().to_vec();
        self.histories.insert(slot, History::new(initial));
        Some(source)
    }

    // ── Drawing gesture ─────────────────────────────────────────────────

    pub fn begin_shape(&mut self, start: Point) {
        self.drag = Drag::Drawing {
            anchor: start,
            path: vec![start],
        };
        self.touch();
    }

    /// Pointer-move during a gesture. Freehand accumulates the sample; the
    /// two-point shapes derive their preview from anchor + current point.
    pub fn update_path(&mut self, current: Point) {
        if let Drag::Drawing { path, .. } = &mut self.drag {
            if self.tool == ShapeKind::Freehand {
                path.push(current);
            }
        }
    }

    /// Geometry of the in-progress shape for the live preview, without
    /// touching the committed set.
    pub fn preview_points(&self, current: Point) -> Option<Vec<Point>> {
        let Drag::Drawing { anchor, path } = &self.drag else {
            return None;
        };
        Some(match self.tool {
            ShapeKind::Freehand => {
                let mut points = path.clone();
                points.push(current);
                points
            }
            _ => vec![*anchor, current],
        })
    }

    /// Pointer-up: builds the annotation, appends it to the active slot in
    /// insertion order, and records a history snapshot.
    pub fn commit_shape(&mut self, end: Point) -> Option<&Annotation> {
        let Drag::Drawing { anchor, path } = std::mem::replace(&mut self.drag, Drag::Idle) else {
            return None;
        };
        let points = match self.tool {
            ShapeKind::Freehand => {
                let mut points = path;
                points.push(end);
                points
            }
            _ => vec![anchor, end],
        };
        let annotation = Annotation {
            id: fresh_annotation_id(),
            kind: self.tool,
            points,
            color: self.color.clone(),
            stroke_width: DEFAULT_STROKE_WIDTH,
            label_id: Some(self.label.clone()),
        };

        let slot = self.active_slot;
        let set = self.annotations.entry(slot).or_default();
        set.push(annotation);
        let snapshot = set.clone();
        self.history_mut().push(snapshot);
        self.touch();
        self.annotations.get(&slot).and_then(|set| set.last())
    }

    pub fn undo(&mut self) {
        if let Some(snapshot) = self.history_mut().undo() {
            self.annotations.insert(self.active_slot, snapshot);
            self.touch();
        }
    }

    pub fn redo(&mut self) {
        if let Some(snapshot) = self.history_mut().redo() {
            self.annotations.insert(self.active_slot, snapshot);
            self.touch();
        }
    }

    /// Clearing is itself an undoable action, not a history wipe.
    pub fn clear_all(&mut self) {
        self.annotations.insert(self.active_slot, Vec::new());
        self.history_mut().push(Vec::new());
        self.touch();
    }

    // ── Persistence ─────────────────────────────────────────────────────

    /// Assembles the document to persist. The save pipeline fills in the
    /// legacy single-slot `images` fallback when this mapping is empty.
    pub fn document(&self) -> AnnotationDocument {
        AnnotationDocument {
            images: self.images.clone(),
            annotations: self.annotations.clone(),
            annotated_images: self.annotated_images.clone(),
        }
    }

    /// Records a successful save. `revision` is the value of
    /// [`EditorState::revision`] at the time the save was requested; the
    /// dirty flag only clears when nothing changed while the save ran.
    pub fn mark_saved(&mut self, slot: Slot, annotated_url: String, revision: u64) {
        self.annotated_images.insert(slot, annotated_url);
        if self.revision == revision {
            self.dirty = false;
        }
    }

    #[cfg(test)]
    fn set_for(&self, slot: Slot) -> &[Annotation] {
        self.annotations.get(&slot).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn images(slots: &[(Slot, &str)]) -> BTreeMap<Slot, String> {
        slots.iter().map(|(s, url)| (*s, url.to_string())).collect()
    }

    fn draw_rect(editor: &mut EditorState, x: f32) {
        editor.begin_shape(Point::new(x, 10.0));
        editor.update_path(Point::new(x + 5.0, 15.0));
        editor.commit_shape(Point::new(x + 10.0, 20.0));
    }

    #[test]
    fn opens_empty_with_priority_slot_selected() {
        let editor = EditorState::open(
            images(&[(Slot::Lower, "l.png"), (Slot::Front, "f.png")]),
            None,
        );
        assert_eq!(editor.active_slot(), Slot::Front);
        assert!(editor.active_set().is_empty());
        assert_eq!(editor.selectable_slots(), vec![Slot::Front, Slot::Lower]);
        assert!(!editor.is_dirty());
    }

    #[test]
    fn undo_n_times_empties_and_redo_restores_order() {
        let mut editor = EditorState::open(images(&[(Slot::Upper, "u.png")]), None);
        for i in 0..4 {
            draw_rect(&mut editor, i as f32 * 20.0);
        }
        let original: Vec<String> = editor.active_set().iter().map(|a| a.id.clone()).collect();
        assert_eq!(original.len(), 4);

        for _ in 0..4 {
            editor.undo();
        }
        assert!(editor.active_set().is_empty());
        editor.undo();
        assert!(editor.active_set().is_empty(), "undo at floor is a no-op");

        for _ in 0..4 {
            editor.redo();
        }
        let restored: Vec<String> = editor.active_set().iter().map(|a| a.id.clone()).collect();
        assert_eq!(restored, original);
        editor.redo();
        assert_eq!(editor.active_set().len(), 4, "redo at ceiling is a no-op");
    }

    #[test]
    fn committing_after_undo_discards_the_redo_branch() {
        let mut editor = EditorState::open(images(&[(Slot::Upper, "u.png")]), None);
        draw_rect(&mut editor, 0.0);
        draw_rect(&mut editor, 30.0);
        editor.undo();
        assert_eq!(editor.active_set().len(), 1);
        assert!(editor.can_redo());

        draw_rect(&mut editor, 60.0);
        assert_eq!(editor.active_set().len(), 2);
        assert!(!editor.can_redo());
    }

    #[test]
    fn freehand_accumulates_the_whole_path() {
        let mut editor = EditorState::open(images(&[(Slot::Upper, "u.png")]), None);
        editor.set_tool(ShapeKind::Freehand);
        editor.begin_shape(Point::new(0.0, 0.0));
        editor.update_path(Point::new(1.0, 1.0));
        editor.update_path(Point::new(2.0, 2.0));
        let preview = editor.preview_points(Point::new(3.0, 3.0)).unwrap();
        assert_eq!(preview.len(), 4);

        editor.commit_shape(Point::new(3.0, 3.0));
        let set = editor.active_set();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].kind, ShapeKind::Freehand);
        assert_eq!(set[0].points.len(), 4);
        assert_eq!(set[0].points[0], Point::new(0.0, 0.0));
        assert_eq!(set[0].points[3], Point::new(3.0, 3.0));
    }

    #[test]
    fn committed_shape_carries_active_style_and_label() {
        let mut editor = EditorState::open(images(&[(Slot::Upper, "u.png")]), None);
        editor.set_tool(ShapeKind::Circle);
        editor.color = "#3b82f6".to_string();
        editor.label = "cavities".to_string();
        editor.begin_shape(Point::new(5.0, 5.0));
        editor.commit_shape(Point::new(8.0, 9.0));

        let ann = &editor.active_set()[0];
        assert_eq!(ann.kind, ShapeKind::Circle);
        assert_eq!(ann.color, "#3b82f6");
        assert_eq!(ann.stroke_width, DEFAULT_STROKE_WIDTH);
        assert_eq!(ann.label_id.as_deref(), Some("cavities"));
        assert_eq!(ann.points, vec![Point::new(5.0, 5.0), Point::new(8.0, 9.0)]);
    }

    #[test]
    fn switching_slots_preserves_the_other_slots_sets() {
        let mut editor = EditorState::open(
            images(&[(Slot::Upper, "u.png"), (Slot::Lower, "l.png")]),
            None,
        );
        assert_eq!(editor.active_slot(), Slot::Upper);
        draw_rect(&mut editor, 0.0);
        draw_rect(&mut editor, 30.0);

        let source = editor.switch_slot(Slot::Lower);
        assert_eq!(source.as_deref(), Some("l.png"));
        assert!(editor.active_set().is_empty());
        assert!(!editor.can_undo(), "history restarts on switch");

        draw_rect(&mut editor, 0.0);
        editor.undo();
        assert_eq!(editor.set_for(Slot::Upper).len(), 2, "upper untouched");

        editor.switch_slot(Slot::Upper);
        assert_eq!(editor.active_set().len(), 2);
        assert_eq!(editor.set_for(Slot::Lower).len(), 0);
    }

    #[test]
    fn switch_to_slot_without_image_is_rejected() {
        let mut editor = EditorState::open(images(&[(Slot::Upper, "u.png")]), None);
        assert!(editor.switch_slot(Slot::Front).is_none());
        assert_eq!(editor.active_slot(), Slot::Upper);
    }

    #[test]
    fn clear_all_is_undoable() {
        let mut editor = EditorState::open(images(&[(Slot::Upper, "u.png")]), None);
        draw_rect(&mut editor, 0.0);
        draw_rect(&mut editor, 30.0);
        editor.clear_all();
        assert!(editor.active_set().is_empty());

        editor.undo();
        assert_eq!(editor.active_set().len(), 2);
        editor.redo();
        assert!(editor.active_set().is_empty());
    }

    #[test]
    fn legacy_bare_array_loads_in_order_with_no_slot_switcher() {
        let stored = json!([
            { "id": "1", "type": "rectangle", "points": [{"x": 0.0, "y": 0.0}, {"x": 1.0, "y": 1.0}], "color": "#ef4444", "strokeWidth": 3.0 },
            { "id": "2", "type": "circle", "points": [{"x": 0.0, "y": 0.0}, {"x": 3.0, "y": 4.0}], "color": "#ef4444", "strokeWidth": 3.0 },
            { "id": "3", "type": "freehand", "points": [{"x": 0.0, "y": 0.0}, {"x": 1.0, "y": 1.0}, {"x": 2.0, "y": 0.0}], "color": "#ef4444", "strokeWidth": 3.0 },
        ]);
        let editor = EditorState::open(images(&[(Slot::Primary, "scan.png")]), Some(&stored));
        assert!(editor.is_legacy());
        assert!(editor.selectable_slots().is_empty());
        let ids: Vec<&str> = editor.active_set().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
    }

    #[test]
    fn full_document_restores_slots_and_selection() {
        let stored = json!({
            "images": { "front": "f.png", "lower": "l.png" },
            "annotations": {
                "lower": [
                    { "id": "9", "type": "arrow", "points": [{"x": 0.0, "y": 0.0}, {"x": 5.0, "y": 5.0}], "color": "#22c55e", "strokeWidth": 3.0, "labelId": "plaque" },
                ],
            },
            "annotated_images": { "lower": "l-annotated.png" },
        });
        let mut editor = EditorState::open(BTreeMap::new(), Some(&stored));
        assert_eq!(editor.active_slot(), Slot::Front);
        assert!(editor.active_set().is_empty());

        editor.switch_slot(Slot::Lower).unwrap();
        assert_eq!(editor.active_set().len(), 1);
        assert_eq!(editor.active_set()[0].label_id.as_deref(), Some("plaque"));

        let doc = editor.document();
        assert_eq!(doc.annotated_images[&Slot::Lower], "l-annotated.png");
    }

    #[test]
    fn unparseable_payload_leaves_the_editor_empty() {
        let stored = Value::String("{{{{".to_string());
        let editor = EditorState::open(images(&[(Slot::Upper, "u.png")]), Some(&stored));
        assert!(editor.active_set().is_empty());
        assert!(!editor.is_dirty());
        assert_eq!(editor.active_slot(), Slot::Upper);
    }

    #[test]
    fn dirty_tracks_edits_and_saves() {
        let mut editor = EditorState::open(images(&[(Slot::Upper, "u.png")]), None);
        assert!(!editor.is_dirty());
        draw_rect(&mut editor, 0.0);
        assert!(editor.is_dirty());
        editor.mark_saved(Slot::Upper, "annotated.png".to_string(), editor.revision());
        assert!(!editor.is_dirty());
        editor.undo();
        assert!(editor.is_dirty(), "visible state diverged from persisted");
    }

    #[test]
    fn edits_during_a_pending_save_keep_the_editor_dirty() {
        let mut editor = EditorState::open(images(&[(Slot::Upper, "u.png")]), None);
        draw_rect(&mut editor, 0.0);
        let at_request = editor.revision();

        // A second shape lands while the save is still running.
        draw_rect(&mut editor, 30.0);
        editor.mark_saved(Slot::Upper, "annotated.png".to_string(), at_request);
        assert!(editor.is_dirty(), "the newer shape is not persisted yet");
        assert_eq!(
            editor.document().annotated_images[&Slot::Upper],
            "annotated.png",
            "the composite url still lands"
        );

        // Saving again with nothing in between does clear the flag.
        editor.mark_saved(Slot::Upper, "annotated-2.png".to_string(), editor.revision());
        assert!(!editor.is_dirty());
    }
}
