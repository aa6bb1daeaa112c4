use std::io::Cursor;

use image::{ImageFormat, Rgba, RgbaImage};

use crate::model::{circle_radius, normalized_rect, parse_hex_color, Annotation, ShapeKind};

/// Arrowhead stroke length in pixels, matching the documents this tool
/// inherits.
const ARROW_HEAD_LEN: f32 = 20.0;
/// Arrowhead strokes sit at ±30° from the shaft direction.
const ARROW_HEAD_ANGLE: f32 = std::f32::consts::PI / 6.0;

/// Draws every committed shape over a copy of the source image, in insertion
/// order. This is the explicit redraw procedure: clear (fresh copy), base
/// image, then each shape on top.
pub fn composite(base: &RgbaImage, annotations: &[Annotation]) -> RgbaImage {
    let mut img = base.clone();
    for annotation in annotations {
        draw_annotation(&mut img, annotation);
    }
    img
}

pub fn draw_annotation(img: &mut RgbaImage, annotation: &Annotation) {
    let color = parse_hex_color(&annotation.color);
    let width = annotation.stroke_width;
    match annotation.kind {
        ShapeKind::Rectangle => {
            let Some((a, b)) = annotation.endpoints() else {
                return;
            };
            let (min, w, h) = normalized_rect(a, b);
            let (max_x, max_y) = (min.x + w, min.y + h);
            draw_line(img, min.x, min.y, max_x, min.y, width, color);
            draw_line(img, max_x, min.y, max_x, max_y, width, color);
            draw_line(img, max_x, max_y, min.x, max_y, width, color);
            draw_line(img, min.x, max_y, min.x, min.y, width, color);
        }
        ShapeKind::Circle => {
            let Some((center, rim)) = annotation.endpoints() else {
                return;
            };
            draw_circle(img, center.x, center.y, circle_radius(center, rim), width, color);
        }
        ShapeKind::Arrow => {
            let Some((from, to)) = annotation.endpoints() else {
                return;
            };
            draw_line(img, from.x, from.y, to.x, to.y, width, color);
            let angle = (to.y - from.y).atan2(to.x - from.x);
            for head_angle in [angle - ARROW_HEAD_ANGLE, angle + ARROW_HEAD_ANGLE] {
                draw_line(
                    img,
                    to.x,
                    to.y,
                    to.x - ARROW_HEAD_LEN * head_angle.cos(),
                    to.y - ARROW_HEAD_LEN * head_angle.sin(),
                    width,
                    color,
                );
            }
        }
        ShapeKind::Freehand => {
            for pair in annotation.points.windows(2) {
                draw_line(img, pair[0].x, pair[0].y, pair[1].x, pair[1].y, width, color);
            }
        }
    }
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

fn draw_line(img: &mut RgbaImage, x0: f32, y0: f32, x1: f32, y1: f32, width: f32, color: [u8; 4]) {
    let dx = x1 - x0;
    let dy = y1 - y0;
    let len = (dx * dx + dy * dy).sqrt();
    let steps = (len * 2.0) as i32;
    let half = (width / 2.0).max(0.5) as i32;
    for i in 0..=steps {
        let t = i as f32 / steps.max(1) as f32;
        stamp(img, x0 + dx * t, y0 + dy * t, half, color);
    }
}

fn draw_circle(img: &mut RgbaImage, cx: f32, cy: f32, radius: f32, width: f32, color: [u8; 4]) {
    if radius <= 0.0 {
        return;
    }
    let half = (width / 2.0).max(0.5) as i32;
    let steps = ((std::f32::consts::TAU * radius * 2.0) as i32).max(8);
    for i in 0..=steps {
        let angle = std::f32::consts::TAU * i as f32 / steps as f32;
        stamp(img, cx + radius * angle.cos(), cy + radius * angle.sin(), half, color);
    }
}

fn stamp(img: &mut RgbaImage, x: f32, y: f32, half: i32, color: [u8; 4]) {
    let (w, h) = (img.width() as i32, img.height() as i32);
    let cx = x as i32;
    let cy = y as i32;
    for oy in -half..=half {
        for ox in -half..=half {
            let px = cx + ox;
            let py = cy + oy;
            if px >= 0 && px < w && py >= 0 && py < h {
                img.put_pixel(px as u32, py as u32, Rgba(color));
            }
        }
    }
}
