// Hotspot detection
// Pure grid clustering over a visible-set snapshot, plus the little
// dismissal state machine the announcement banner runs on.

use std::collections::HashMap;

use crate::store::VisibleUser;

/// Cell edge of the clustering grid, in degrees. Roughly a neighbourhood
/// at Istanbul's latitude.
pub const GRID_SIZE_DEG: f64 = 0.01;

/// Visible users one cell must hold to count as a hotspot.
pub const HOTSPOT_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotspotInfo {
    /// Size of the densest cell, or the total user count when the whole
    /// snapshot is too small to qualify anyway.
    pub user_count: usize,
    pub is_hotspot: bool,
}

/// Grid cell of a coordinate pair. `floor`, not truncation, so cells stay
/// consistent across the sign change at the equator and meridian.
pub fn grid_cell(lat: f64, lon: f64) -> (i64, i64) {
    (
        (lat / GRID_SIZE_DEG).floor() as i64,
        (lon / GRID_SIZE_DEG).floor() as i64,
    )
}

/// Cluster a snapshot and report the densest cell. Pure and stateless;
/// feed it each new snapshot as it arrives.
pub fn detect_hotspot(users: &[VisibleUser]) -> HotspotInfo {
    if users.len() < HOTSPOT_THRESHOLD {
        return HotspotInfo {
            user_count: users.len(),
            is_hotspot: false,
        };
    }

    let mut grid: HashMap<(i64, i64), usize> = HashMap::new();
    for user in users {
        *grid.entry(grid_cell(user.lat, user.lon)).or_insert(0) += 1;
    }
    let densest = grid.values().copied().max().unwrap_or(0);

    HotspotInfo {
        user_count: densest,
        is_hotspot: densest >= HOTSPOT_THRESHOLD,
    }
}

/// Dismissal state of the hotspot announcement.
///
/// A dismissed announcement stays hidden while the hotspot persists and
/// re-arms once the condition clears, so the next hotspot episode is
/// announced again.
#[derive(Debug, Default)]
pub struct HotspotBanner {
    dismissed: bool,
}

impl HotspotBanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one detection result; returns the info to announce, or `None`
    /// while there is nothing to show.
    pub fn observe(&mut self, info: HotspotInfo) -> Option<HotspotInfo> {
        if !info.is_hotspot {
            self.dismissed = false;
            return None;
        }
        if self.dismissed {
            return None;
        }
        Some(info)
    }

    pub fn dismiss(&mut self) {
        self.dismissed = true;
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn user(id: &str, lat: f64, lon: f64) -> VisibleUser {
        VisibleUser {
            user_id: id.to_string(),
            lat,
            lon,
            nickname: id.to_string(),
            vehicle_brand: None,
            vehicle_model: None,
            expires_at: Utc::now() + Duration::minutes(10),
        }
    }

    fn crowd(count: usize, lat: f64, lon: f64) -> Vec<VisibleUser> {
        (0..count)
            .map(|i| user(&format!("u{i}"), lat + i as f64 * 0.0001, lon))
            .collect()
    }

    #[test]
    fn four_neighbours_are_not_a_hotspot() {
        let info = detect_hotspot(&crowd(4, 41.005, 28.985));
        assert_eq!(info, HotspotInfo { user_count: 4, is_hotspot: false });

        let mut users = crowd(4, 41.005, 28.985);
        users.push(user("fifth", 41.0052, 28.9851));
        let info = detect_hotspot(&users);
        assert_eq!(info, HotspotInfo { user_count: 5, is_hotspot: true });
    }

    #[test]
    fn users_across_the_cell_boundary_do_not_cluster() {
        // Five users total, but 41.011 falls in the next cell up from the
        // 41.00xx block, so no single cell reaches the threshold.
        let mut users = crowd(4, 41.0005, 28.985);
        users.push(user("outside", 41.011, 28.985));

        let info = detect_hotspot(&users);
        assert!(!info.is_hotspot);
        assert_eq!(info.user_count, 4);
    }

    #[test]
    fn empty_snapshot_reports_zero() {
        let info = detect_hotspot(&[]);
        assert_eq!(info, HotspotInfo { user_count: 0, is_hotspot: false });
    }

    #[test]
    fn cells_floor_across_the_sign_change() {
        assert_eq!(grid_cell(-0.001, -0.001), (-1, -1));
        assert_eq!(grid_cell(0.001, 0.001), (0, 0));
        assert_eq!(grid_cell(41.0052, 28.9754), (4100, 2897));
    }

    #[test]
    fn nearby_points_can_still_land_in_different_cells() {
        // 1.2 km apart on paper, but also across a cell edge.
        assert_ne!(grid_cell(41.000, 29.000), grid_cell(41.011, 29.000));
        assert_eq!(grid_cell(41.000, 29.000), (4100, 2900));
        assert_eq!(grid_cell(41.011, 29.000), (4101, 2900));
    }

    #[test]
    fn dismissed_banner_rearms_after_the_crowd_disperses() {
        let hot = HotspotInfo { user_count: 6, is_hotspot: true };
        let quiet = HotspotInfo { user_count: 2, is_hotspot: false };
        let mut banner = HotspotBanner::new();

        assert_eq!(banner.observe(hot), Some(hot));
        banner.dismiss();
        assert_eq!(banner.observe(hot), None);

        // Condition clears, then comes back: announce again.
        assert_eq!(banner.observe(quiet), None);
        assert_eq!(banner.observe(hot), Some(hot));
    }
}
