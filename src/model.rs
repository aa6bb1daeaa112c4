use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Wire-compatible annotation schema ───────────────────────────────────────
//
// Field names stay camelCase so documents written by earlier reviewer builds
// load unchanged.

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Rectangle,
    Circle,
    Arrow,
    Freehand,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ShapeKind,
    pub points: Vec<Point>,
    pub color: String,
    #[serde(rename = "strokeWidth")]
    pub stroke_width: f32,
    #[serde(rename = "labelId", default, skip_serializing_if = "Option::is_none")]
    pub label_id: Option<String>,
}

impl Annotation {
    /// Anchor/terminal pair for the two-point shapes. `None` for freehand or
    /// malformed geometry.
    pub fn endpoints(&self) -> Option<(Point, Point)> {
        match (self.kind, self.points.as_slice()) {
            (ShapeKind::Freehand, _) => None,
            (_, [a, .., b]) => Some((*a, *b)),
            _ => None,
        }
    }
}

/// Time-derived annotation id, milliseconds since the epoch as in the
/// documents this tool inherits.
pub fn fresh_annotation_id() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

// ── Image slots ─────────────────────────────────────────────────────────────

/// The named image positions a record may hold. `Primary` is the legacy key
/// used when a record carries a single unnamed image. Declaration order is
/// the selection priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Upper,
    Front,
    Lower,
    Primary,
}

impl Slot {
    pub const ALL: [Slot; 4] = [Slot::Upper, Slot::Front, Slot::Lower, Slot::Primary];

    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Upper => "upper",
            Slot::Front => "front",
            Slot::Lower => "lower",
            Slot::Primary => "primary",
        }
    }

    /// Button caption; the legacy slot just says "Image".
    pub fn display_name(self) -> &'static str {
        match self {
            Slot::Upper => "Upper",
            Slot::Front => "Front",
            Slot::Lower => "Lower",
            Slot::Primary => "Image",
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Annotation document ─────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationDocument {
    #[serde(default)]
    pub images: BTreeMap<Slot, String>,
    #[serde(default)]
    pub annotations: BTreeMap<Slot, Vec<Annotation>>,
    #[serde(default)]
    pub annotated_images: BTreeMap<Slot, String>,
}

impl AnnotationDocument {
    /// First slot (in priority order) that has a source image.
    pub fn first_slot(&self) -> Option<Slot> {
        Slot::ALL.into_iter().find(|s| self.images.contains_key(s))
    }

    /// Moves `primary` entries under `front` when `front` is absent in the
    /// same mapping. When both keys exist, both are kept; `front` wins the
    /// selection race by priority order.
    pub fn canonicalize(&mut self) {
        fn merge<V>(map: &mut BTreeMap<Slot, V>) {
            if !map.contains_key(&Slot::Front) {
                if let Some(v) = map.remove(&Slot::Primary) {
                    map.insert(Slot::Front, v);
                }
            }
        }
        if self.images.contains_key(&Slot::Primary) && !self.images.contains_key(&Slot::Front) {
            merge(&mut self.images);
            merge(&mut self.annotations);
            merge(&mut self.annotated_images);
        }
    }

    /// Distinct clinical label ids across every slot, sorted.
    pub fn distinct_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .annotations
            .values()
            .flatten()
            .filter_map(|a| a.label_id.clone())
            .collect();
        labels.sort();
        labels.dedup();
        labels
    }

    /// Report generation downstream refuses to run below two distinct
    /// conditions.
    pub fn report_ready(&self) -> bool {
        self.distinct_labels().len() >= 2
    }
}

// ── Stored payload decoding ─────────────────────────────────────────────────

/// Canonical form of whatever the record's annotation field holds: the full
/// document schema, a legacy bare shape array from single-image records, or
/// nothing usable.
#[derive(Clone, Debug, PartialEq)]
pub enum StoredAnnotations {
    Document(AnnotationDocument),
    Legacy(Vec<Annotation>),
    Empty,
}

impl StoredAnnotations {
    /// Lenient decode. The field may be a JSON value or a string containing
    /// JSON; unrecognized shapes decode to `Empty`, malformed individual
    /// annotations are skipped.
    pub fn decode(raw: &Value) -> Self {
        let value = match raw {
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(inner) => inner,
                Err(err) => {
                    tracing::warn!(%err, "stored annotations are not valid JSON");
                    return StoredAnnotations::Empty;
                }
            },
            other => other.clone(),
        };

        match value {
            Value::Array(items) => StoredAnnotations::Legacy(decode_annotation_list(items)),
            Value::Object(_) => {
                let mut doc = AnnotationDocument {
                    images: decode_map(value.get("images")),
                    annotations: match value.get("annotations") {
                        Some(Value::Object(map)) => map
                            .iter()
                            .filter_map(|(key, list)| {
                                let slot = decode_slot(key)?;
                                let items = list.as_array()?.clone();
                                Some((slot, decode_annotation_list(items)))
                            })
                            .collect(),
                        _ => BTreeMap::new(),
                    },
                    annotated_images: decode_map(value.get("annotated_images")),
                };
                doc.canonicalize();
                StoredAnnotations::Document(doc)
            }
            _ => {
                tracing::warn!("stored annotations have an unrecognized shape");
                StoredAnnotations::Empty
            }
        }
    }
}

fn decode_slot(key: &str) -> Option<Slot> {
    Slot::ALL.into_iter().find(|s| s.as_str() == key)
}

fn decode_map(value: Option<&Value>) -> BTreeMap<Slot, String> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(key, v)| Some((decode_slot(key)?, v.as_str()?.to_string())))
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn decode_annotation_list(items: Vec<Value>) -> Vec<Annotation> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Annotation>(item) {
            Ok(annotation) => Some(annotation),
            Err(err) => {
                tracing::warn!(%err, "skipping malformed annotation");
                None
            }
        })
        .collect()
}

// ── Geometry ────────────────────────────────────────────────────────────────

/// Normalized rectangle as (top-left, width, height), regardless of which
/// corner the drag started from.
pub fn normalized_rect(anchor: Point, terminal: Point) -> (Point, f32, f32) {
    let min = Point::new(anchor.x.min(terminal.x), anchor.y.min(terminal.y));
    (min, (anchor.x - terminal.x).abs(), (anchor.y - terminal.y).abs())
}

pub fn circle_radius(center: Point, rim: Point) -> f32 {
    center.distance(rim)
}

// ── Clinical catalog and palette ────────────────────────────────────────────

pub struct Condition {
    pub id: &'static str,
    pub label: &'static str,
}

pub const CONDITIONS: [Condition; 8] = [
    Condition { id: "inflamed_gums", label: "Inflamed / Red gums" },
    Condition { id: "malaligned", label: "Malaligned teeth" },
    Condition { id: "receded_gums", label: "Receded gums" },
    Condition { id: "stains", label: "Stains" },
    Condition { id: "attrition", label: "Attrition" },
    Condition { id: "crowns", label: "Crowns" },
    Condition { id: "cavities", label: "Cavities" },
    Condition { id: "plaque", label: "Plaque" },
];

pub const DEFAULT_CONDITION: &str = "stains";

pub const PALETTE: [&str; 7] = [
    "#ef4444", "#f97316", "#eab308", "#22c55e", "#3b82f6", "#8b5cf6", "#ec4899",
];

pub const DEFAULT_STROKE_WIDTH: f32 = 3.0;

/// `#rrggbb` → RGBA bytes; malformed input falls back to the default red.
pub fn parse_hex_color(color: &str) -> [u8; 4] {
    fn channels(color: &str) -> Option<[u8; 4]> {
        let hex = color.strip_prefix('#')?;
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        Some([r, g, b, 255])
    }
    channels(color).unwrap_or([0xef, 0x44, 0x44, 255])
}
