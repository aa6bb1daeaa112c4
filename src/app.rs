use std::sync::Arc;

use eframe::egui;
use image::RgbaImage;

use crate::editor::{Drag, EditorState};
use crate::loader::ImageLoader;
use crate::model::{
    parse_hex_color, Point, ShapeKind, Slot, CONDITIONS, DEFAULT_STROKE_WIDTH, PALETTE,
};
use crate::render;
use crate::save::{SaveRequest, Saver};
use crate::store::{BlobStore, Record, RecordStore};

const TOOLS: [(ShapeKind, &str); 4] = [
    (ShapeKind::Rectangle, "Rectangle"),
    (ShapeKind::Circle, "Circle"),
    (ShapeKind::Arrow, "Arrow"),
    (ShapeKind::Freehand, "Freehand"),
];

pub struct ReviewApp {
    record_id: String,
    editor: EditorState,
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
    loader: ImageLoader,
    saver: Saver,

    /// Source image of the active slot at native resolution. The drawing
    /// surface always matches these dimensions, which keeps the
    /// pointer-to-pixel mapping exact.
    base: Option<RgbaImage>,
    texture: Option<egui::TextureHandle>,
    load_error: Option<String>,
    save_error: Option<String>,
    /// Editor revision captured when the in-flight save was requested.
    save_revision: u64,
}

impl ReviewApp {
    pub fn new(record: Record, blobs: Arc<dyn BlobStore>, records: Arc<dyn RecordStore>) -> Self {
        let editor = EditorState::open(record.images, record.annotation_data.as_ref());
        let mut loader = ImageLoader::new();
        if let Some(source) = editor.active_image() {
            loader.request(editor.active_slot(), source);
        }
        Self {
            record_id: record.id,
            editor,
            blobs,
            records,
            loader,
            saver: Saver::new(),
            base: None,
            texture: None,
            load_error: None,
            save_error: None,
            save_revision: 0,
        }
    }

    fn poll_background(&mut self, ctx: &egui::Context) {
        if let Some(loaded) = self.loader.poll() {
            match loaded.result {
                Ok(img) => {
                    self.base = Some(img);
                    self.texture = None;
                    self.load_error = None;
                }
                Err(err) => {
                    tracing::error!(slot = %loaded.slot, %err, "image load failed");
                    self.load_error = Some(err);
                }
            }
            ctx.request_repaint();
        }

        if let Some(outcome) = self.saver.poll() {
            match outcome {
                Ok(outcome) => {
                    self.editor
                        .mark_saved(outcome.slot, outcome.annotated_url, self.save_revision);
                    self.save_error = None;
                }
                Err(err) => {
                    tracing::error!(%err, "save failed");
                    self.save_error = Some(err.to_string());
                }
            }
            ctx.request_repaint();
        }
    }

    fn ensure_texture(&mut self, ctx: &egui::Context) {
        if self.texture.is_some() {
            return;
        }
        if let Some(ref img) = self.base {
            let size = [img.width() as usize, img.height() as usize];
            let color_image =
                egui::ColorImage::from_rgba_unmultiplied(size, img.as_flat_samples().as_slice());
            self.texture =
                Some(ctx.load_texture("slot-image", color_image, egui::TextureOptions::LINEAR));
        }
    }

    fn switch_slot(&mut self, slot: Slot) {
        if slot == self.editor.active_slot() {
            return;
        }
        if let Some(source) = self.editor.switch_slot(slot) {
            // Drop the stale surface; the load completion brings the new one.
            self.base = None;
            self.texture = None;
            self.load_error = None;
            self.loader.request(slot, &source);
        }
    }

    fn request_save(&mut self) {
        let Some(base) = self.base.clone() else {
            tracing::warn!("save requested with no loaded image");
            return;
        };
        if self.saver.is_saving() {
            return;
        }
        let request = SaveRequest {
            record_id: self.record_id.clone(),
            slot: self.editor.active_slot(),
            base,
            annotations: self.editor.active_set().to_vec(),
            document: self.editor.document(),
            source_image: self.editor.active_image().map(str::to_string),
        };
        if self
            .saver
            .request(request, self.blobs.clone(), self.records.clone())
        {
            self.save_revision = self.editor.revision();
        }
    }

    /// Local raster download of the current view; no persistence involved.
    fn export_current_view(&self) {
        let Some(ref base) = self.base else {
            return;
        };
        let Some(path) = rfd::FileDialog::new()
            .set_file_name(format!("annotated-{}.png", self.record_id))
            .save_file()
        else {
            return;
        };
        let composite = render::composite(base, self.editor.active_set());
        if let Err(err) = composite.save(&path) {
            tracing::error!(%err, "export failed");
        } else {
            tracing::info!(path = %path.display(), "exported current view");
        }
    }

    fn toolbar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal_wrapped(|ui| {
            let slots = self.editor.selectable_slots();
            if !slots.is_empty() {
                ui.label("Image:");
                for slot in slots {
                    if ui
                        .selectable_label(self.editor.active_slot() == slot, slot.display_name())
                        .clicked()
                    {
                        self.switch_slot(slot);
                    }
                }
                ui.separator();
            }

            ui.label("Tools:");
            for (tool, name) in TOOLS {
                if ui
                    .selectable_label(self.editor.tool() == tool, name)
                    .clicked()
                {
                    self.editor.set_tool(tool);
                }
            }
            ui.separator();

            ui.label("Color:");
            for color in PALETTE {
                let [r, g, b, _] = parse_hex_color(color);
                let fill = egui::Color32::from_rgb(r, g, b);
                let selected = self.editor.color == color;
                let button = egui::Button::new("")
                    .fill(fill)
                    .min_size(egui::vec2(18.0, 18.0))
                    .stroke(if selected {
                        egui::Stroke::new(2.0, egui::Color32::BLACK)
                    } else {
                        egui::Stroke::new(1.0, egui::Color32::GRAY)
                    });
                if ui.add(button).clicked() {
                    self.editor.color = color.to_string();
                }
            }
            ui.separator();

            ui.label("Regarding:");
            let current = CONDITIONS
                .iter()
                .find(|c| c.id == self.editor.label)
                .map(|c| c.label)
                .unwrap_or(self.editor.label.as_str());
            egui::ComboBox::from_id_salt("condition")
                .selected_text(current)
                .show_ui(ui, |ui| {
                    for condition in &CONDITIONS {
                        ui.selectable_value(
                            &mut self.editor.label,
                            condition.id.to_string(),
                            condition.label,
                        );
                    }
                });
            ui.separator();

            if ui
                .add_enabled(self.editor.can_undo(), egui::Button::new("Undo"))
                .clicked()
            {
                self.editor.undo();
            }
            if ui
                .add_enabled(self.editor.can_redo(), egui::Button::new("Redo"))
                .clicked()
            {
                self.editor.redo();
            }
            if ui.button("Clear").clicked() {
                self.editor.clear_all();
            }
            if ui.button("Download").clicked() {
                self.export_current_view();
            }

            let save_text = if self.saver.is_saving() {
                "Saving..."
            } else if self.editor.is_dirty() {
                "Save Annotations"
            } else {
                "Saved"
            };
            let can_save =
                self.editor.is_dirty() && !self.saver.is_saving() && self.base.is_some();
            if ui
                .add_enabled(can_save, egui::Button::new(save_text))
                .clicked()
            {
                self.request_save();
            }
        });
    }

    fn canvas(&mut self, ui: &mut egui::Ui) {
        let Some(ref base) = self.base else {
            if let Some(ref err) = self.load_error {
                ui.colored_label(egui::Color32::RED, format!("Image failed to load: {err}"));
            } else {
                ui.spinner();
                ui.label("Loading image...");
            }
            return;
        };
        let native = egui::vec2(base.width() as f32, base.height() as f32);

        // Fit to the panel without exceeding native resolution.
        let avail = ui.available_size();
        let fit = (avail.x / native.x).min(avail.y / native.y).min(1.0);
        let display = native * fit;

        let (response, painter) = ui.allocate_painter(display, egui::Sense::click_and_drag());
        let rect = response.rect;
        // Native pixels per screen point; this ratio is what turns pointer
        // positions into image coordinates.
        let scale = native.x / rect.width();

        if let Some(ref tex) = self.texture {
            painter.image(
                tex.id(),
                rect,
                egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                egui::Color32::WHITE,
            );
        }

        let to_screen = |p: Point| -> egui::Pos2 {
            egui::pos2(rect.min.x + p.x / scale, rect.min.y + p.y / scale)
        };
        let to_image = |pos: egui::Pos2| -> Point {
            Point::new((pos.x - rect.min.x) * scale, (pos.y - rect.min.y) * scale)
        };

        // Committed shapes in insertion order, then the live preview on top.
        for annotation in self.editor.active_set() {
            let [r, g, b, _] = parse_hex_color(&annotation.color);
            let stroke = egui::Stroke::new(
                annotation.stroke_width / scale,
                egui::Color32::from_rgb(r, g, b),
            );
            paint_shape(&painter, annotation.kind, &annotation.points, scale, stroke, &to_screen);
        }

        if !matches!(self.editor.drag(), Drag::Idle) {
            if let Some(pos) = response
                .interact_pointer_pos()
                .or_else(|| response.hover_pos())
            {
                if let Some(points) = self.editor.preview_points(to_image(pos)) {
                    let [r, g, b, _] = parse_hex_color(&self.editor.color);
                    let stroke = egui::Stroke::new(
                        DEFAULT_STROKE_WIDTH / scale,
                        egui::Color32::from_rgb(r, g, b),
                    );
                    paint_shape(&painter, self.editor.tool(), &points, scale, stroke, &to_screen);
                }
            }
        }

        if response.drag_started_by(egui::PointerButton::Primary) {
            if let Some(pos) = response.interact_pointer_pos() {
                self.editor.begin_shape(to_image(pos));
            }
        }
        if response.dragged_by(egui::PointerButton::Primary) {
            if let Some(pos) = response.interact_pointer_pos() {
                self.editor.update_path(to_image(pos));
            }
        }
        if response.drag_stopped_by(egui::PointerButton::Primary) {
            if let Some(pos) = response
                .interact_pointer_pos()
                .or(ui.ctx().input(|i| i.pointer.latest_pos()))
            {
                self.editor.commit_shape(to_image(pos));
            }
        }
    }
}

/// Draws one shape onto the egui painter. `scale` converts image-space
/// lengths (like the 20 px arrowhead) into screen points.
fn paint_shape(
    painter: &egui::Painter,
    kind: ShapeKind,
    points: &[Point],
    scale: f32,
    stroke: egui::Stroke,
    to_screen: &dyn Fn(Point) -> egui::Pos2,
) {
    match kind {
        ShapeKind::Rectangle => {
            if let [a, .., b] = points {
                let rect = egui::Rect::from_two_pos(to_screen(*a), to_screen(*b));
                painter.rect_stroke(rect, 0.0, stroke, egui::StrokeKind::Middle);
            }
        }
        ShapeKind::Circle => {
            if let [center, .., rim] = points {
                let radius = center.distance(*rim) / scale;
                painter.circle_stroke(to_screen(*center), radius, stroke);
            }
        }
        ShapeKind::Arrow => {
            if let [a, .., b] = points {
                let from = to_screen(*a);
                let to = to_screen(*b);
                painter.line_segment([from, to], stroke);
                let angle = (to.y - from.y).atan2(to.x - from.x);
                let head = 20.0 / scale;
                for head_angle in [
                    angle - std::f32::consts::PI / 6.0,
                    angle + std::f32::consts::PI / 6.0,
                ] {
                    painter.line_segment(
                        [
                            to,
                            egui::pos2(
                                to.x - head * head_angle.cos(),
                                to.y - head * head_angle.sin(),
                            ),
                        ],
                        stroke,
                    );
                }
            }
        }
        ShapeKind::Freehand => {
            for pair in points.windows(2) {
                painter.line_segment([to_screen(pair[0]), to_screen(pair[1])], stroke);
            }
        }
    }
}

impl eframe::App for ReviewApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_background(ctx);
        self.ensure_texture(ctx);

        ctx.input(|i| {
            if i.modifiers.ctrl && i.key_pressed(egui::Key::Z) {
                if i.modifiers.shift {
                    self.editor.redo();
                } else {
                    self.editor.undo();
                }
            }
        });
        if ctx.input(|i| i.modifiers.ctrl && i.key_pressed(egui::Key::S)) {
            self.request_save();
        }

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            self.toolbar(ui);
        });

        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if let Some(ref err) = self.save_error {
                    ui.colored_label(egui::Color32::RED, format!("Save failed: {err}"));
                } else if self.editor.is_dirty() {
                    ui.label("Unsaved changes");
                } else {
                    ui.label("All changes saved");
                }
                ui.separator();
                ui.label(format!("{} annotations", self.editor.active_set().len()));
                if self.editor.document().report_ready() {
                    ui.separator();
                    ui.label("Report ready");
                }
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.canvas(ui);
        });

        // Keep polling while background work is outstanding.
        if self.saver.is_saving() || self.base.is_none() {
            ctx.request_repaint_after(std::time::Duration::from_millis(50));
        }
    }
}
