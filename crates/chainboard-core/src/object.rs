//! Drawable objects: the unit of collaborative board state.

use crate::geometry;
use kurbo::{Point, Rect, Vec2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stroke width assumed for hit-testing when an object has none (sticky notes).
pub const DEFAULT_HIT_STROKE_WIDTH: u8 = 5;
/// Extra padding added around an object's bounds when hit-testing.
pub const HIT_PADDING: f64 = 5.0;
/// Width given to text objects, whose extent the ledger does not record.
pub const TEXT_DEFAULT_WIDTH: f64 = 100.0;
/// Text height per font-size unit.
pub const TEXT_HEIGHT_PER_FONT_UNIT: f64 = 5.0;
/// Default sticky note size.
pub const STICKY_DEFAULT_WIDTH: f64 = 200.0;
pub const STICKY_DEFAULT_HEIGHT: f64 = 150.0;

/// Object identifier.
///
/// Negative values are provisional (generated locally, not yet confirmed by
/// the ledger); non-negative values are canonical ledger ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub i64);

impl ObjectId {
    pub fn is_provisional(self) -> bool {
        self.0 < 0
    }

    pub fn is_canonical(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_provisional() {
            write!(f, "~{}", -self.0)
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Identity of a board participant (a ledger account address).
///
/// Addresses compare case-insensitively, so the value is normalized to
/// lowercase on construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<ParticipantId> for String {
    fn from(value: ParticipantId) -> Self {
        value.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The seven object kinds, in the ledger's numeric order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Stroke = 0,
    Rectangle = 1,
    Ellipse = 2,
    Line = 3,
    Arrow = 4,
    StickyNote = 5,
    Text = 6,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 7] = [
        ObjectKind::Stroke,
        ObjectKind::Rectangle,
        ObjectKind::Ellipse,
        ObjectKind::Line,
        ObjectKind::Arrow,
        ObjectKind::StickyNote,
        ObjectKind::Text,
    ];

    /// Decode the ledger's numeric kind.
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    /// Kinds whose geometry travels as a plain bounding box.
    pub fn is_geometric_shape(self) -> bool {
        matches!(
            self,
            ObjectKind::Rectangle | ObjectKind::Ellipse | ObjectKind::Line | ObjectKind::Arrow
        )
    }
}

/// Per-kind payload. Only the fields relevant to a kind exist on its variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectBody {
    /// Freehand stroke; `points` is the source of truth for its geometry.
    Stroke { points: Vec<Point> },
    Rectangle { rotation: u16 },
    Ellipse { rotation: u16 },
    Line { rotation: u16 },
    Arrow { rotation: u16 },
    StickyNote { content: String, background: u8 },
    Text { content: String, font_size: u8 },
}

impl ObjectBody {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectBody::Stroke { .. } => ObjectKind::Stroke,
            ObjectBody::Rectangle { .. } => ObjectKind::Rectangle,
            ObjectBody::Ellipse { .. } => ObjectKind::Ellipse,
            ObjectBody::Line { .. } => ObjectKind::Line,
            ObjectBody::Arrow { .. } => ObjectKind::Arrow,
            ObjectBody::StickyNote { .. } => ObjectKind::StickyNote,
            ObjectBody::Text { .. } => ObjectKind::Text,
        }
    }

    /// Body for a box-shaped kind, or `None` if `kind` carries other data.
    pub fn geometric(kind: ObjectKind, rotation: u16) -> Option<Self> {
        match kind {
            ObjectKind::Rectangle => Some(ObjectBody::Rectangle { rotation }),
            ObjectKind::Ellipse => Some(ObjectBody::Ellipse { rotation }),
            ObjectKind::Line => Some(ObjectBody::Line { rotation }),
            ObjectKind::Arrow => Some(ObjectBody::Arrow { rotation }),
            ObjectKind::Stroke | ObjectKind::StickyNote | ObjectKind::Text => None,
        }
    }
}

/// Colour and stroke attributes as the ledger records them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectStyle {
    /// Index into the board palette.
    pub color_index: u8,
    /// Stroke width (font size for text, 0 for sticky notes).
    pub stroke_width: u8,
}

/// A drawing object as held by the [`ObjectStore`](crate::store::ObjectStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawableObject {
    pub(crate) id: ObjectId,
    pub(crate) creator: ParticipantId,
    /// Ordering key; ascending layer renders back to front.
    pub(crate) layer: u32,
    pub(crate) bounds: Rect,
    pub(crate) style: ObjectStyle,
    pub(crate) locked: bool,
    pub(crate) body: ObjectBody,
}

impl DrawableObject {
    /// Build an object. For strokes the given `bounds` is ignored and derived
    /// from the points.
    pub fn new(
        id: ObjectId,
        creator: ParticipantId,
        layer: u32,
        bounds: Rect,
        style: ObjectStyle,
        body: ObjectBody,
    ) -> Self {
        let bounds = match &body {
            ObjectBody::Stroke { points } => geometry::stroke_bounds(points),
            _ => bounds,
        };
        Self {
            id,
            creator,
            layer,
            bounds,
            style,
            locked: false,
            body,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.body.kind()
    }

    pub fn creator(&self) -> &ParticipantId {
        &self.creator
    }

    pub fn layer(&self) -> u32 {
        self.layer
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn style(&self) -> ObjectStyle {
        self.style
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn body(&self) -> &ObjectBody {
        &self.body
    }

    /// Stroke points, if this is a stroke.
    pub fn points(&self) -> Option<&[Point]> {
        match &self.body {
            ObjectBody::Stroke { points } => Some(points),
            _ => None,
        }
    }

    /// Text payload of sticky notes and text objects.
    pub fn content(&self) -> Option<&str> {
        match &self.body {
            ObjectBody::StickyNote { content, .. } | ObjectBody::Text { content, .. } => {
                Some(content)
            }
            _ => None,
        }
    }

    /// Hit-test against the bounds inflated by a stroke-width-derived padding.
    pub fn hit_test(&self, point: Point) -> bool {
        let width = match self.style.stroke_width {
            0 => DEFAULT_HIT_STROKE_WIDTH,
            w => w,
        };
        let pad = f64::from(width) + HIT_PADDING;
        let area = self.bounds.inflate(pad, pad);
        // Inclusive on every edge, unlike `Rect::contains`.
        (area.x0..=area.x1).contains(&point.x) && (area.y0..=area.y1).contains(&point.y)
    }

    pub(crate) fn translate(&mut self, delta: Vec2) {
        self.bounds = self.bounds + delta;
        if let ObjectBody::Stroke { points } = &mut self.body {
            geometry::translate_points(points, delta);
        }
    }

    /// Replace the bounding box. Strokes are re-projected into the new box and
    /// their bounds re-derived from the resulting points.
    pub(crate) fn set_bounds(&mut self, bounds: Rect) {
        match &mut self.body {
            ObjectBody::Stroke { points } => {
                *points = geometry::remap_points(points, self.bounds, bounds);
                self.bounds = geometry::stroke_bounds(points);
            }
            _ => self.bounds = bounds,
        }
    }

    /// Replace stroke points and re-derive bounds. Ignored for other kinds.
    pub(crate) fn set_points(&mut self, new_points: Vec<Point>) -> bool {
        match &mut self.body {
            ObjectBody::Stroke { points } => {
                self.bounds = geometry::stroke_bounds(&new_points);
                *points = new_points;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn set_content(&mut self, new_content: String) -> bool {
        match &mut self.body {
            ObjectBody::StickyNote { content, .. } | ObjectBody::Text { content, .. } => {
                *content = new_content;
                true
            }
            _ => false,
        }
    }
}

/// Partial update applied by [`ObjectStore::update`](crate::store::ObjectStore::update).
///
/// `id`, `kind` and `creator` are immutable and have no field here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectPatch {
    pub bounds: Option<Rect>,
    pub points: Option<Vec<Point>>,
    pub content: Option<String>,
    pub layer: Option<u32>,
    pub locked: Option<bool>,
}

impl ObjectPatch {
    pub fn bounds(bounds: Rect) -> Self {
        Self {
            bounds: Some(bounds),
            ..Self::default()
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn layer(layer: u32) -> Self {
        Self {
            layer: Some(layer),
            ..Self::default()
        }
    }

    pub fn locked(locked: bool) -> Self {
        Self {
            locked: Some(locked),
            ..Self::default()
        }
    }

    pub fn with_points(mut self, points: Vec<Point>) -> Self {
        self.points = Some(points);
        self
    }
}

/// What a local gesture produced, before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectDraft {
    Stroke {
        points: Vec<Point>,
        style: ObjectStyle,
    },
    Shape {
        kind: ObjectKind,
        bounds: Rect,
        style: ObjectStyle,
    },
    StickyNote {
        origin: Point,
        content: String,
        background: u8,
    },
    Text {
        origin: Point,
        content: String,
        color_index: u8,
        font_size: u8,
    },
}

impl ObjectDraft {
    /// Materialize the draft under `id`, or `None` if the draft is unusable
    /// (an empty stroke, or a `Shape` draft naming a non-box kind).
    pub fn into_object(self, id: ObjectId, creator: ParticipantId, layer: u32) -> Option<DrawableObject> {
        let object = match self {
            ObjectDraft::Stroke { points, style } => {
                if points.is_empty() {
                    return None;
                }
                DrawableObject::new(id, creator, layer, Rect::ZERO, style, ObjectBody::Stroke { points })
            }
            ObjectDraft::Shape { kind, bounds, style } => {
                let body = ObjectBody::geometric(kind, 0)?;
                DrawableObject::new(id, creator, layer, bounds.abs(), style, body)
            }
            ObjectDraft::StickyNote {
                origin,
                content,
                background,
            } => DrawableObject::new(
                id,
                creator,
                layer,
                Rect::from_origin_size(origin, (STICKY_DEFAULT_WIDTH, STICKY_DEFAULT_HEIGHT)),
                ObjectStyle::default(),
                ObjectBody::StickyNote { content, background },
            ),
            ObjectDraft::Text {
                origin,
                content,
                color_index,
                font_size,
            } => DrawableObject::new(
                id,
                creator,
                layer,
                text_bounds(origin, font_size),
                ObjectStyle {
                    color_index,
                    stroke_width: font_size,
                },
                ObjectBody::Text { content, font_size },
            ),
        };
        Some(object)
    }
}

/// Bounds given to a text object anchored at `origin`.
pub fn text_bounds(origin: Point, font_size: u8) -> Rect {
    Rect::from_origin_size(
        origin,
        (TEXT_DEFAULT_WIDTH, f64::from(font_size) * TEXT_HEIGHT_PER_FONT_UNIT),
    )
}
