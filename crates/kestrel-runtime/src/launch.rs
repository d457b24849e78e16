//! Index spaces and launch resolution.
//!
//! A launch is described by a global extent and an optional local
//! (work-group) extent. [`resolve`] turns that pair into the concrete
//! work-group size and work-group count for a device, or rejects it with
//! [`RuntimeError::LaunchConfiguration`] before anything is enqueued.

use crate::error::{Result, RuntimeError};
use crate::registry::DeviceInfo;

/// Preferred work-group extents, indexed by rank - 1.
const PREFERRED: [[u32; 3]; 3] = [[64, 1, 1], [8, 8, 1], [4, 4, 4]];

/// A 1-, 2- or 3-dimensional extent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NdRange {
    dims: Vec<u32>,
}

impl NdRange {
    /// One-dimensional extent.
    pub fn d1(x: u32) -> Self {
        Self { dims: vec![x] }
    }

    /// Two-dimensional extent.
    pub fn d2(x: u32, y: u32) -> Self {
        Self { dims: vec![x, y] }
    }

    /// Three-dimensional extent.
    pub fn d3(x: u32, y: u32, z: u32) -> Self {
        Self { dims: vec![x, y, z] }
    }

    /// Extent from a slice. Rank and extents are checked at launch.
    pub fn from_slice(dims: &[u32]) -> Self {
        Self {
            dims: dims.to_vec(),
        }
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Extents per dimension.
    pub fn dims(&self) -> &[u32] {
        &self.dims
    }

    /// Total number of work-items.
    pub fn len(&self) -> u64 {
        self.dims.iter().map(|&d| d as u64).product()
    }

    /// True when any extent is zero.
    pub fn is_empty(&self) -> bool {
        self.dims.iter().any(|&d| d == 0)
    }

    /// Extents padded with 1 to three dimensions.
    pub fn to_array(&self) -> [u32; 3] {
        let mut out = [1; 3];
        for (o, &d) in out.iter_mut().zip(&self.dims) {
            *o = d;
        }
        out
    }
}

impl From<u32> for NdRange {
    fn from(x: u32) -> Self {
        Self::d1(x)
    }
}

impl From<[u32; 2]> for NdRange {
    fn from([x, y]: [u32; 2]) -> Self {
        Self::d2(x, y)
    }
}

impl From<[u32; 3]> for NdRange {
    fn from([x, y, z]: [u32; 3]) -> Self {
        Self::d3(x, y, z)
    }
}

/// Device limits relevant to launching a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchLimits {
    /// Maximum product of the local extents.
    pub max_work_group_size: u32,
    /// Maximum local extent per dimension.
    pub max_work_item_sizes: [u32; 3],
    /// Maximum work-group count per dimension.
    pub max_work_groups_per_dimension: u32,
}

impl From<&DeviceInfo> for LaunchLimits {
    fn from(info: &DeviceInfo) -> Self {
        Self {
            max_work_group_size: info.max_work_group_size,
            max_work_item_sizes: info.max_work_item_sizes,
            max_work_groups_per_dimension: info.max_work_groups_per_dimension,
        }
    }
}

/// A launch resolved against device limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Launch {
    /// Work-group size, padded to three dimensions.
    pub local: [u32; 3],
    /// Work-group count, padded to three dimensions.
    pub workgroups: [u32; 3],
    /// True when the dispatched grid is larger than the global extent and
    /// kernels must bounds-check their global id.
    pub padded: bool,
}

/// Resolve `global`/`local` into a launch for a device with `limits`.
///
/// Without a local extent the largest divisor of each global extent not
/// above the preferred size (64, 8x8 or 4x4x4) and the device limits is
/// chosen. If that needs more work-groups than the device allows, or the
/// divisor is below a quarter of the preferred size for an extent at least
/// that large (e.g. a prime), the dimension is padded up to a multiple of
/// the preferred size instead.
///
/// # Errors
/// [`RuntimeError::LaunchConfiguration`] if the rank is not 1-3, an extent
/// is zero, or a supplied local extent does not fit the global extent or
/// the device.
pub fn resolve(
    kernel: &str,
    global: &NdRange,
    local: Option<&NdRange>,
    limits: &LaunchLimits,
) -> Result<Launch> {
    let fail = |local: Option<Vec<u32>>, reason: String| RuntimeError::LaunchConfiguration {
        kernel: kernel.to_string(),
        global: global.dims().to_vec(),
        local,
        reason,
    };

    if !(1..=3).contains(&global.rank()) {
        return Err(fail(
            local.map(|l| l.dims().to_vec()),
            format!("global extent must have 1 to 3 dimensions, got {}", global.rank()),
        ));
    }
    if global.is_empty() {
        return Err(fail(
            local.map(|l| l.dims().to_vec()),
            "global extent must be nonzero in every dimension".to_string(),
        ));
    }

    match local {
        Some(local) => resolve_explicit(global, local, limits).map_err(|reason| {
            fail(Some(local.dims().to_vec()), reason)
        }),
        None => {
            let launch = resolve_auto(global, limits);
            let max = limits.max_work_groups_per_dimension;
            if let Some(d) = launch.workgroups.iter().position(|&n| n > max) {
                return Err(fail(
                    Some(launch.local[..global.rank()].to_vec()),
                    format!(
                        "dimension {d} needs {} work-groups, device allows {max}",
                        launch.workgroups[d]
                    ),
                ));
            }
            Ok(launch)
        }
    }
}

fn resolve_explicit(
    global: &NdRange,
    local: &NdRange,
    limits: &LaunchLimits,
) -> std::result::Result<Launch, String> {
    if local.rank() != global.rank() {
        return Err(format!(
            "local extent has {} dimensions, global has {}",
            local.rank(),
            global.rank()
        ));
    }
    if local.is_empty() {
        return Err("local extent must be nonzero in every dimension".to_string());
    }

    let size = local.len();
    if size > limits.max_work_group_size as u64 {
        return Err(format!(
            "work-group size {size} exceeds device maximum {}",
            limits.max_work_group_size
        ));
    }

    let g = global.to_array();
    let l = local.to_array();
    let mut workgroups = [1; 3];
    for d in 0..global.rank() {
        if l[d] > limits.max_work_item_sizes[d] {
            return Err(format!(
                "local extent {} in dimension {d} exceeds device maximum {}",
                l[d], limits.max_work_item_sizes[d]
            ));
        }
        if g[d] % l[d] != 0 {
            return Err(format!(
                "local extent {} does not divide global extent {} in dimension {d}",
                l[d], g[d]
            ));
        }
        workgroups[d] = g[d] / l[d];
        if workgroups[d] > limits.max_work_groups_per_dimension {
            return Err(format!(
                "dimension {d} needs {} work-groups, device allows {}",
                workgroups[d], limits.max_work_groups_per_dimension
            ));
        }
    }

    Ok(Launch {
        local: l,
        workgroups,
        padded: false,
    })
}

fn resolve_auto(global: &NdRange, limits: &LaunchLimits) -> Launch {
    let rank = global.rank();
    let g = global.to_array();
    let preferred = PREFERRED[rank - 1];

    let mut local = [1; 3];
    let mut workgroups = [1; 3];
    let mut padded = false;
    for d in 0..rank {
        let cap = preferred[d]
            .min(limits.max_work_item_sizes[d])
            .min(limits.max_work_group_size)
            .max(1);
        let divisor = largest_divisor_at_most(g[d], cap);
        let too_narrow = g[d] >= cap && divisor < cap / 4;
        if !too_narrow && g[d] / divisor <= limits.max_work_groups_per_dimension {
            local[d] = divisor;
            workgroups[d] = g[d] / divisor;
        } else {
            local[d] = cap;
            workgroups[d] = g[d].div_ceil(cap);
            padded |= g[d] % cap != 0;
        }
    }

    // Preferred products are 64, which fits every device wgpu exposes; this
    // only matters for hand-written limits.
    while local.iter().map(|&l| l as u64).product::<u64>() > limits.max_work_group_size as u64 {
        let (d, _) = local
            .iter()
            .enumerate()
            .max_by_key(|(_, &l)| l)
            .unwrap_or((0, &1));
        local[d] = (local[d] / 2).max(1);
        workgroups[d] = g[d].div_ceil(local[d]);
        padded |= g[d] % local[d] != 0;
    }

    Launch {
        local,
        workgroups,
        padded,
    }
}

fn largest_divisor_at_most(n: u32, cap: u32) -> u32 {
    (1..=cap.min(n)).rev().find(|c| n % c == 0).unwrap_or(1)
}
