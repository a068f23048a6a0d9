use serde::{Deserialize, Serialize};

use crate::PixelPoint;

pub type TrackId = u64;

/// Axis-aligned box in pixel coordinates, left/top/right/bottom inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl BoundingBox {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.left <= x && x <= self.right && self.top <= y && y <= self.bottom
    }

    /// Integer center, rounded toward negative infinity.
    pub fn center(&self) -> (i32, i32) {
        (
            (self.left + self.right).div_euclid(2),
            (self.top + self.bottom).div_euclid(2),
        )
    }

    pub fn center_point(&self) -> PixelPoint {
        let (x, y) = self.center();
        PixelPoint::new(x.into(), y.into())
    }
}

/// One track as reported by the detector for the current video frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    #[serde(default = "default_confirmed")]
    pub confirmed: bool,
}

fn default_confirmed() -> bool {
    true
}

/// A track chosen by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub id: TrackId,
    pub center: PixelPoint,
}

/// First confirmed track whose box contains the point.
pub fn select_at(tracks: &[Track], x: i32, y: i32) -> Option<Selection> {
    tracks
        .iter()
        .filter(|t| t.confirmed)
        .find(|t| t.bbox.contains(x, y))
        .map(|t| Selection {
            id: t.id,
            center: t.bbox.center_point(),
        })
}

pub fn find_confirmed(tracks: &[Track], id: TrackId) -> Option<&Track> {
    tracks.iter().find(|t| t.confirmed && t.id == id)
}

/// Operator-facing description of the tracked target.
pub fn describe(track: Option<&Track>) -> String {
    match track {
        Some(t) => format!(
            "track {}: x {}-{}, y {}-{}",
            t.id, t.bbox.left, t.bbox.right, t.bbox.top, t.bbox.bottom
        ),
        None => "no target selected".to_string(),
    }
}
