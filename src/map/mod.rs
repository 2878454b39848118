// Map presentation
// Projects a visible-set snapshot into the marker list a map renderer
// consumes. No geometry beyond picking a center; clustering lives in the
// hotspot module.

use crate::signal::types::LocationFix;
use crate::store::VisibleUser;

/// Shown when a profile carries an empty nickname.
const FALLBACK_NICKNAME: &str = "Sürücü";

/// Label of the own-position marker.
const SELF_LABEL: &str = "Sen";

#[derive(Debug, Clone, PartialEq)]
pub struct MapMarker {
    pub user_id: String,
    pub lat: f64,
    pub lon: f64,
    pub label: String,
    /// Popup line under the label, `"<brand> <model>"` when known.
    pub vehicle: Option<String>,
    pub is_self: bool,
}

/// Marker list derived from the latest snapshot plus the own device fix.
///
/// The snapshot is rendered as-is; while the own signal is active the own
/// row appears there like anyone else's, and the local device fix is drawn
/// as a separate marker on top of it.
#[derive(Debug)]
pub struct MapViewModel {
    user_id: String,
    default_center: (f64, f64),
    self_position: Option<LocationFix>,
    markers: Vec<MapMarker>,
    visible_count: usize,
}

impl MapViewModel {
    pub fn new(user_id: impl Into<String>, default_center: (f64, f64)) -> Self {
        Self {
            user_id: user_id.into(),
            default_center,
            self_position: None,
            markers: Vec::new(),
            visible_count: 0,
        }
    }

    /// Own device fix; `None` while the own signal is off, which also
    /// removes the self marker on the next rebuild.
    pub fn set_self_position(&mut self, fix: Option<LocationFix>) {
        self.self_position = fix;
        self.rebuild_self_marker();
    }

    /// Rebuild the marker list from a fresh snapshot.
    pub fn apply_snapshot(&mut self, users: &[VisibleUser]) {
        self.visible_count = users.len();
        self.markers = users
            .iter()
            .map(|user| MapMarker {
                user_id: user.user_id.clone(),
                lat: user.lat,
                lon: user.lon,
                label: display_name(&user.nickname).to_string(),
                vehicle: vehicle_label(user),
                is_self: false,
            })
            .collect();
        self.rebuild_self_marker();
    }

    fn rebuild_self_marker(&mut self) {
        self.markers.retain(|marker| !marker.is_self);
        if let Some(fix) = self.self_position {
            self.markers.push(MapMarker {
                user_id: self.user_id.clone(),
                lat: fix.lat,
                lon: fix.lon,
                label: SELF_LABEL.to_string(),
                vehicle: None,
                is_self: true,
            });
        }
    }

    pub fn markers(&self) -> &[MapMarker] {
        &self.markers
    }

    /// How many users are visible right now, own signal included.
    pub fn visible_count(&self) -> usize {
        self.visible_count
    }

    /// Where to center the view: the own fix when there is one, otherwise
    /// the configured default.
    pub fn center(&self) -> (f64, f64) {
        self.self_position
            .map(|fix| (fix.lat, fix.lon))
            .unwrap_or(self.default_center)
    }
}

fn display_name(nickname: &str) -> &str {
    if nickname.trim().is_empty() {
        FALLBACK_NICKNAME
    } else {
        nickname
    }
}

fn vehicle_label(user: &VisibleUser) -> Option<String> {
    match (user.vehicle_brand.as_deref(), user.vehicle_model.as_deref()) {
        (Some(brand), Some(model)) => Some(format!("{brand} {model}")),
        (Some(brand), None) => Some(brand.to_string()),
        (None, Some(model)) => Some(model.to_string()),
        (None, None) => None,
    }
}
