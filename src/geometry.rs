use crate::error::{MagnifyError, MagnifyResult};

/// Integer rectangle in left/top/right/bottom form, right and bottom exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub const fn from_origin_size(x: i32, y: i32, size: Size) -> Self {
        Self::new(x, y, x + size.width as i32, y + size.height as i32)
    }

    pub const fn width(&self) -> i32 {
        self.right - self.left
    }

    pub const fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub const fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    /// Size of the rectangle, or `None` when it is empty.
    pub fn size(&self) -> Option<Size> {
        if self.is_empty() {
            return None;
        }
        Some(Size::new(self.width() as u32, self.height() as u32))
    }

    pub const fn translated(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.left + dx, self.top + dy, self.right + dx, self.bottom + dy)
    }

    /// Expresses `self` relative to the origin of `outer`.
    pub const fn relative_to(&self, outer: &Rect) -> Self {
        self.translated(-outer.left, -outer.top)
    }

    pub const fn contains(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }

    /// True when the interiors intersect. Touching edges do not overlap.
    pub const fn overlaps(&self, other: &Rect) -> bool {
        intervals_overlap(self.left, self.right, other.left, other.right)
            && intervals_overlap(self.top, self.bottom, other.top, other.bottom)
    }
}

#[inline(always)]
const fn intervals_overlap(a_start: i32, a_end: i32, b_start: i32, b_end: i32) -> bool {
    a_start < b_end && b_start < a_end
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Affine map from screen pixels into the source window's device-context
/// pixels: `x' = a*x + bx`, `y' = a*y + by`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DpiMapping {
    pub a: f64,
    pub bx: f64,
    pub by: f64,
}

impl DpiMapping {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        bx: 0.0,
        by: 0.0,
    };

    /// Maps a rectangle, rounding each edge half away from zero.
    pub fn map_rect(&self, rect: &Rect) -> Rect {
        Rect::new(
            round_to_i32(rect.left as f64 * self.a + self.bx),
            round_to_i32(rect.top as f64 * self.a + self.by),
            round_to_i32(rect.right as f64 * self.a + self.bx),
            round_to_i32(rect.bottom as f64 * self.a + self.by),
        )
    }
}

#[inline]
fn round_to_i32(value: f64) -> i32 {
    value.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

/// Rejects crop rectangles with negative coordinates or no area.
pub fn validate_crop(rect: Rect) -> MagnifyResult<Rect> {
    if rect.left < 0 || rect.top < 0 || rect.right < 0 || rect.bottom < 0 {
        return Err(MagnifyError::Geometry(format!(
            "crop rectangle {rect:?} has negative coordinates"
        )));
    }
    if rect.is_empty() {
        return Err(MagnifyError::Geometry(format!(
            "crop rectangle {rect:?} is empty"
        )));
    }
    Ok(rect)
}

/// Returns the new window rectangle when `window` is not fully inside
/// `work_area`; the window is then centered in the work area.
pub fn center_in_work_area(window: &Rect, work_area: &Rect) -> Option<Rect> {
    if work_area.contains(window) {
        return None;
    }
    let left = work_area.left + (work_area.width() - window.width()) / 2;
    let top = work_area.top + (work_area.height() - window.height()) / 2;
    Some(Rect::new(
        left,
        top,
        left + window.width(),
        top + window.height(),
    ))
}

/// Checks moved regions first, then dirty regions, stopping at the first hit.
pub fn any_region_overlaps(tracked: &Rect, moved: &[Rect], dirty: &[Rect]) -> bool {
    moved
        .iter()
        .chain(dirty.iter())
        .any(|region| region.overlaps(tracked))
}

/// Where the final image lands in the host back buffer, and which part of it
/// is copied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Placement {
    pub dst_x: u32,
    pub dst_y: u32,
    pub src_x: u32,
    pub src_y: u32,
    pub width: u32,
    pub height: u32,
}

impl Placement {
    /// Centers `output` inside `host` with integer halving and clips the copy
    /// to the smaller dimension on each axis.
    pub fn center(host: Size, output: Size) -> Self {
        let (dst_x, src_x, width) = center_axis(host.width, output.width);
        let (dst_y, src_y, height) = center_axis(host.height, output.height);
        Self {
            dst_x,
            dst_y,
            src_x,
            src_y,
            width,
            height,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// The host-space rectangle covered by the copy.
    pub const fn destination(&self) -> Rect {
        Rect::new(
            self.dst_x as i32,
            self.dst_y as i32,
            (self.dst_x + self.width) as i32,
            (self.dst_y + self.height) as i32,
        )
    }
}

fn center_axis(host: u32, output: u32) -> (u32, u32, u32) {
    let offset = (host as i64 - output as i64) / 2;
    let extent = host.min(output);
    if offset >= 0 {
        (offset as u32, 0, extent)
    } else {
        (0, (-offset) as u32, extent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_ignores_touching_edges() {
        let tracked = Rect::new(100, 100, 200, 200);
        assert!(tracked.overlaps(&Rect::new(150, 150, 160, 160)));
        assert!(tracked.overlaps(&Rect::new(0, 0, 101, 101)));
        assert!(!tracked.overlaps(&Rect::new(200, 100, 300, 200)));
        assert!(!tracked.overlaps(&Rect::new(0, 0, 100, 100)));
    }

    #[test]
    fn region_check_reports_moves_and_dirty_rects() {
        let tracked = Rect::new(10, 10, 50, 50);
        let far = [Rect::new(500, 500, 600, 600)];
        let near = [Rect::new(40, 40, 60, 60)];
        assert!(!any_region_overlaps(&tracked, &far, &far));
        assert!(any_region_overlaps(&tracked, &near, &[]));
        assert!(any_region_overlaps(&tracked, &[], &near));
        assert!(!any_region_overlaps(&tracked, &[], &[]));
    }

    #[test]
    fn dpi_mapping_rounds_half_away_from_zero() {
        let mapping = DpiMapping {
            a: 1.5,
            bx: -0.25,
            by: 0.0,
        };
        let mapped = mapping.map_rect(&Rect::new(1, 1, 3, 5));
        assert_eq!(mapped, Rect::new(1, 2, 4, 8));
        assert_eq!(
            DpiMapping::IDENTITY.map_rect(&Rect::new(-5, 3, 10, 20)),
            Rect::new(-5, 3, 10, 20)
        );
    }

    #[test]
    fn degenerate_mapped_rect_is_a_geometry_error() {
        let mapping = DpiMapping {
            a: 0.001,
            bx: 0.0,
            by: 0.0,
        };
        let mapped = mapping.map_rect(&Rect::new(0, 0, 100, 100));
        let err = validate_crop(mapped).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Geometry);
        assert_eq!(err.reason(), crate::error::ErrorReason::CropFailed);
    }

    #[test]
    fn negative_crop_is_rejected() {
        assert!(validate_crop(Rect::new(-1, 0, 10, 10)).is_err());
        assert!(validate_crop(Rect::new(0, 0, 10, 10)).is_ok());
    }

    #[test]
    fn window_inside_work_area_is_not_moved() {
        let work = Rect::new(0, 0, 1920, 1040);
        assert_eq!(center_in_work_area(&Rect::new(10, 10, 810, 610), &work), None);
    }

    #[test]
    fn window_straddling_work_area_is_centered() {
        let work = Rect::new(0, 0, 1920, 1040);
        let moved = center_in_work_area(&Rect::new(1500, -20, 2300, 580), &work);
        assert_eq!(moved, Some(Rect::new(560, 220, 1360, 820)));
    }

    #[test]
    fn oversized_output_is_centered_and_clipped() {
        let placement = Placement::center(Size::new(1920, 1080), Size::new(1600, 1200));
        assert_eq!(placement.dst_x, 160);
        assert_eq!(placement.dst_y, 0);
        assert_eq!(placement.src_x, 0);
        assert_eq!(placement.src_y, 60);
        assert_eq!(placement.width, 1600);
        assert_eq!(placement.height, 1080);
    }

    #[test]
    fn odd_margins_round_toward_zero() {
        let placement = Placement::center(Size::new(101, 100), Size::new(50, 100));
        assert_eq!(placement.dst_x, 25);
        assert_eq!(placement.destination(), Rect::new(25, 0, 75, 100));
    }

    #[test]
    fn relative_rect_translates_into_outer_space() {
        let client = Rect::new(108, 131, 908, 731);
        let frame = Rect::new(100, 100, 916, 739);
        assert_eq!(client.relative_to(&frame), Rect::new(8, 31, 808, 631));
        assert_eq!(client.size(), Some(Size::new(800, 600)));
    }
}
