//! Spatial query shapes accepted by `select_spatial`.

/// A spatial predicate over feature bounding boxes.
///
/// `PointIntersects` matches features whose *bounding box* contains the
/// point, not whose geometry does; it is a degenerate bbox query. Callers
/// needing exact containment must post-filter decoded geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpatialQuery {
    Bbox {
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    },
    PointIntersects {
        x: f64,
        y: f64,
    },
    /// The single feature whose bounding box is closest to the point,
    /// ties broken by smaller feature offset.
    PointNearest {
        x: f64,
        y: f64,
    },
}

impl SpatialQuery {
    pub fn bbox(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        SpatialQuery::Bbox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn point_intersects(x: f64, y: f64) -> Self {
        SpatialQuery::PointIntersects { x, y }
    }

    pub fn point_nearest(x: f64, y: f64) -> Self {
        SpatialQuery::PointNearest { x, y }
    }

    /// The search rectangle for box-filter queries; `None` for nearest.
    pub(crate) fn search_bounds(&self) -> Option<(f64, f64, f64, f64)> {
        match *self {
            SpatialQuery::Bbox {
                min_x,
                min_y,
                max_x,
                max_y,
            } => Some((min_x, min_y, max_x, max_y)),
            SpatialQuery::PointIntersects { x, y } => Some((x, y, x, y)),
            SpatialQuery::PointNearest { .. } => None,
        }
    }

    /// Canonical string used in query fingerprints.
    pub(crate) fn fingerprint(&self) -> String {
        match *self {
            SpatialQuery::Bbox {
                min_x,
                min_y,
                max_x,
                max_y,
            } => format!("bbox-{min_x}-{min_y}-{max_x}-{max_y}"),
            SpatialQuery::PointIntersects { x, y } => format!("pi-{x}-{y}"),
            SpatialQuery::PointNearest { x, y } => format!("pn-{x}-{y}"),
        }
    }
}
