//! Flattened geometry encoding.
//!
//! Nested CityJSON boundaries are stored as five flat arrays: per-solid shell
//! counts, per-shell surface counts, per-surface ring counts, per-ring index
//! counts, and the flat vertex indices. The nesting depth observed while
//! flattening decides which count array a level belongs to, and the decoder
//! rebuilds the hierarchy with one cursor per array.

use crate::cj::{Boundaries, GeometryType, SemanticsValues};

/// Sentinel for "no semantic surface" in flattened semantic values.
pub(crate) const NO_SEMANTICS: u32 = u32::MAX;

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FlatBoundaries {
    /// Number of shells per solid
    pub solids: Vec<u32>,
    /// Number of surfaces per shell
    pub shells: Vec<u32>,
    /// Number of rings per surface
    pub surfaces: Vec<u32>,
    /// Number of indices per ring
    pub strings: Vec<u32>,
    /// Flattened vertex indices
    pub indices: Vec<u32>,
}

pub(crate) fn encode_boundaries(boundaries: &Boundaries) -> FlatBoundaries {
    let mut flat = FlatBoundaries::default();
    flatten(boundaries, &mut flat);
    flat
}

/// Returns the depth of this subtree: 1 for a ring, 2 for a surface, 3 for a
/// shell, 4 for a solid.
fn flatten(boundaries: &Boundaries, flat: &mut FlatBoundaries) -> usize {
    match boundaries {
        Boundaries::Indices(indices) => {
            flat.indices.extend_from_slice(indices);
            flat.strings.push(indices.len() as u32);
            1
        }
        Boundaries::Nested(children) => {
            let mut max_depth = 0;
            for child in children {
                max_depth = max_depth.max(flatten(child, flat));
            }
            match max_depth {
                1 => flat.surfaces.push(children.len() as u32),
                2 => flat.shells.push(children.len() as u32),
                3 => flat.solids.push(children.len() as u32),
                // a list of solids has no count array of its own; the decoder
                // derives the grouping from the solids array length
                _ => {}
            }
            max_depth + 1
        }
    }
}

pub(crate) fn decode_boundaries(flat: &FlatBoundaries) -> Boundaries {
    let mut cursors = Cursors::default();
    if !flat.solids.is_empty() {
        let solids: Vec<Boundaries> = flat
            .solids
            .iter()
            .map(|&shell_count| {
                let shells: Vec<Boundaries> = (0..shell_count)
                    .map(|_| cursors.next_shell(flat))
                    .collect();
                Boundaries::Nested(shells)
            })
            .collect();
        unwrap_singleton(solids)
    } else if !flat.shells.is_empty() {
        let shells: Vec<Boundaries> = flat
            .shells
            .iter()
            .map(|&surface_count| cursors.shell_of(flat, surface_count))
            .collect();
        unwrap_singleton(shells)
    } else if !flat.surfaces.is_empty() {
        let surfaces: Vec<Boundaries> = flat
            .surfaces
            .iter()
            .map(|&ring_count| cursors.surface_of(flat, ring_count))
            .collect();
        unwrap_singleton(surfaces)
    } else if !flat.strings.is_empty() {
        let rings: Vec<Boundaries> = flat
            .strings
            .iter()
            .map(|&ring_size| cursors.ring_of(flat, ring_size))
            .collect();
        unwrap_singleton(rings)
    } else {
        Boundaries::Indices(flat.indices.clone())
    }
}

fn unwrap_singleton(mut list: Vec<Boundaries>) -> Boundaries {
    if list.len() == 1 {
        list.remove(0)
    } else {
        Boundaries::Nested(list)
    }
}

#[derive(Default)]
struct Cursors {
    shell: usize,
    surface: usize,
    ring: usize,
    index: usize,
}

impl Cursors {
    fn next_shell(&mut self, flat: &FlatBoundaries) -> Boundaries {
        let surface_count = flat.shells[self.shell];
        self.shell += 1;
        self.shell_of(flat, surface_count)
    }

    fn shell_of(&mut self, flat: &FlatBoundaries, surface_count: u32) -> Boundaries {
        let surfaces: Vec<Boundaries> = (0..surface_count)
            .map(|_| {
                let ring_count = flat.surfaces[self.surface];
                self.surface += 1;
                self.surface_of(flat, ring_count)
            })
            .collect();
        Boundaries::Nested(surfaces)
    }

    fn surface_of(&mut self, flat: &FlatBoundaries, ring_count: u32) -> Boundaries {
        let rings: Vec<Boundaries> = (0..ring_count)
            .map(|_| {
                let ring_size = flat.strings[self.ring];
                self.ring += 1;
                self.ring_of(flat, ring_size)
            })
            .collect();
        Boundaries::Nested(rings)
    }

    fn ring_of(&mut self, flat: &FlatBoundaries, ring_size: u32) -> Boundaries {
        let indices = flat.indices[self.index..self.index + ring_size as usize].to_vec();
        self.index += ring_size as usize;
        Boundaries::Indices(indices)
    }
}

/// Flatten semantic values depth-first; `None` becomes the sentinel. The
/// nesting is rebuilt from the geometry's own count arrays.
pub(crate) fn encode_semantics_values(values: &SemanticsValues, flattened: &mut Vec<u32>) {
    match values {
        SemanticsValues::Indices(indices) => {
            flattened.extend(indices.iter().map(|v| v.unwrap_or(NO_SEMANTICS)));
        }
        SemanticsValues::Nested(children) => {
            for child in children {
                encode_semantics_values(child, flattened);
            }
        }
    }
}

/// Rebuild the nested semantic values for a geometry: one level per shell for
/// solids, one more for multi-solids; surface-level geometries stay flat.
pub(crate) fn decode_semantics_values(
    gtype: GeometryType,
    flat: &FlatBoundaries,
    values: &[u32],
) -> SemanticsValues {
    match gtype {
        GeometryType::Solid => {
            let mut shell_cursor = 0usize;
            let mut values = values;
            let shell_count = flat.solids.first().copied().unwrap_or(0);
            SemanticsValues::Nested(take_shells(flat, &mut shell_cursor, shell_count, &mut values))
        }
        GeometryType::MultiSolid | GeometryType::CompositeSolid => {
            let mut shell_cursor = 0usize;
            let mut values = values;
            let solids = flat
                .solids
                .iter()
                .map(|&shell_count| {
                    SemanticsValues::Nested(take_shells(
                        flat,
                        &mut shell_cursor,
                        shell_count,
                        &mut values,
                    ))
                })
                .collect();
            SemanticsValues::Nested(solids)
        }
        _ => SemanticsValues::Indices(values.iter().map(to_option).collect()),
    }
}

fn to_option(v: &u32) -> Option<u32> {
    if *v == NO_SEMANTICS {
        None
    } else {
        Some(*v)
    }
}

/// Consume one semantic-value chunk per shell, sized by the shell's surface
/// count, advancing both the shell cursor and the value slice.
fn take_shells(
    flat: &FlatBoundaries,
    shell_cursor: &mut usize,
    shell_count: u32,
    values: &mut &[u32],
) -> Vec<SemanticsValues> {
    let mut shells = Vec::with_capacity(shell_count as usize);
    for _ in 0..shell_count {
        let surface_count = (flat.shells[*shell_cursor] as usize).min(values.len());
        *shell_cursor += 1;
        let (chunk, rest) = values.split_at(surface_count);
        *values = rest;
        shells.push(SemanticsValues::Indices(chunk.iter().map(to_option).collect()));
    }
    shells
}
