//! Region locator
//!
//! Maps a fragment onto the archive's persisted sequence axis. The range
//! along the sequence dimension starts at the first archive entry not before
//! the fragment's first entry and ends before the first archive entry after
//! its last one. Every other dimension is written in full.
//!
//! Fragments whose first or last entry is not on the archive's axis, or
//! whose entries do not line up one-to-one with the located range, are
//! rejected with [`Error::OutOfExtent`] instead of being clipped. A fragment
//! whose sequence coordinate is not strictly increasing is a
//! [`Error::StructuralMismatch`].

use gridstore_core::time::format_datetime;
use gridstore_core::{Dataset, Error, MemDataset, Region, Result};
use gridstore_storage::Archive;
use tracing::debug;

/// Locate `fragment` inside `archive` along `sequence_dim`
pub fn locate(fragment: &MemDataset, archive: &Archive, sequence_dim: &str) -> Result<Region> {
    let times = fragment
        .coordinate(sequence_dim)
        .and_then(|c| c.as_time())
        .ok_or_else(|| {
            Error::StructuralMismatch(format!("fragment has no time coordinate '{}'", sequence_dim))
        })?;
    let (Some(first), Some(last)) = (times.first(), times.last()) else {
        return Err(Error::OutOfExtent(format!(
            "fragment has no entries along '{}'",
            sequence_dim
        )));
    };
    if let Some(i) = times.windows(2).position(|w| w[0] >= w[1]) {
        return Err(Error::StructuralMismatch(format!(
            "fragment '{}' is not strictly increasing: {} is followed by {}",
            sequence_dim,
            format_datetime(&times[i]),
            format_datetime(&times[i + 1])
        )));
    }

    let axis_coord = archive.read_coordinate(sequence_dim)?;
    let axis = axis_coord.as_time().ok_or_else(|| {
        Error::StructuralMismatch(format!("archive coordinate '{}' is not a time axis", sequence_dim))
    })?;

    let start = axis.partition_point(|t| t < first);
    let end = axis.partition_point(|t| t <= last);

    let on_axis = |i: usize, t| axis.get(i) == Some(t);
    if !on_axis(start, first) || end == 0 || !on_axis(end - 1, last) {
        let extent = match (axis.first(), axis.last()) {
            (Some(a), Some(b)) => format!("{} .. {}", format_datetime(a), format_datetime(b)),
            _ => "empty axis".to_string(),
        };
        return Err(Error::OutOfExtent(format!(
            "fragment {} .. {} is not on the archive axis ({})",
            format_datetime(first),
            format_datetime(last),
            extent
        )));
    }
    if end - start != times.len() {
        return Err(Error::OutOfExtent(format!(
            "fragment has {} entries but spans {} archive entries along '{}'",
            times.len(),
            end - start,
            sequence_dim
        )));
    }

    let mut region = Region::new().with(sequence_dim, start..end);
    for dim in archive.dimensions()? {
        if dim.name != sequence_dim {
            region.insert(dim.name, 0..dim.length);
        }
    }
    debug!(%region, "located fragment");
    Ok(region)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridstore_core::time::parse_datetime;
    use gridstore_core::Coordinate;
    use gridstore_storage::{MemoryStore, StoreRef};
    use std::sync::Arc;

    fn days(start: &str, n: usize) -> Vec<chrono::NaiveDateTime> {
        let start = parse_datetime(start).unwrap();
        (0..n).map(|i| start + chrono::Duration::days(i as i64)).collect()
    }

    fn archive() -> Archive {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let mut archive = Archive::create(store, Default::default(), false).unwrap();
        archive.write_coordinate(&Coordinate::time("time", days("2000-01-01", 10))).unwrap();
        archive.write_coordinate(&Coordinate::numeric("lat", vec![0.0, 1.0, 2.0])).unwrap();
        archive
    }

    fn fragment(start: &str, n: usize) -> MemDataset {
        let mut ds = MemDataset::new();
        ds.add_coordinate(Coordinate::time("time", days(start, n))).unwrap();
        ds
    }

    #[test]
    fn test_locate_tail() {
        let region = locate(&fragment("2000-01-06", 5), &archive(), "time").unwrap();
        assert_eq!(region.get("time"), Some(5..10));
        assert_eq!(region.get("lat"), Some(0..3));
    }

    #[test]
    fn test_locate_single_entry() {
        let region = locate(&fragment("2000-01-01", 1), &archive(), "time").unwrap();
        assert_eq!(region.get("time"), Some(0..1));
    }

    #[test]
    fn test_outside_extent_is_rejected() {
        for (start, n) in [("2000-01-08", 5), ("1999-12-30", 3), ("2001-01-01", 1)] {
            let err = locate(&fragment(start, n), &archive(), "time").unwrap_err();
            assert!(matches!(err, Error::OutOfExtent(_)), "{} +{}", start, n);
        }
    }

    #[test]
    fn test_gappy_fragment_is_rejected() {
        let mut ds = MemDataset::new();
        let mut times = days("2000-01-02", 1);
        times.extend(days("2000-01-05", 1));
        ds.add_coordinate(Coordinate::time("time", times)).unwrap();
        assert!(matches!(locate(&ds, &archive(), "time"), Err(Error::OutOfExtent(_))));
    }

    #[test]
    fn test_unordered_fragment_is_rejected() {
        let d = days("2000-01-03", 4);
        for times in [vec![d[0], d[2], d[1], d[3]], vec![d[0], d[1], d[1], d[3]]] {
            let mut ds = MemDataset::new();
            ds.add_coordinate(Coordinate::time("time", times)).unwrap();
            assert!(matches!(
                locate(&ds, &archive(), "time"),
                Err(Error::StructuralMismatch(_))
            ));
        }
    }

    #[test]
    fn test_fragment_without_time() {
        let ds = MemDataset::new();
        assert!(matches!(
            locate(&ds, &archive(), "time"),
            Err(Error::StructuralMismatch(_))
        ));
    }
}
