//! Scale-offset packing
//!
//! Variables that declare `valid_min` and `valid_max` attributes can be
//! stored as 8, 16 or 32-bit integer codes. [`Packer::encoding`] derives the
//! [`ScaleOffset`] filter for one variable; [`add_valid_range_attributes`]
//! writes the range attributes from the data for datasets that lack them.

use gridstore_core::{Error, MemDataset, Result, Variable};
use gridstore_storage::ScaleOffset;
use tracing::debug;

/// Attribute holding the lowest valid value
pub const VALID_MIN_ATTR: &str = "valid_min";
/// Attribute holding the highest valid value
pub const VALID_MAX_ATTR: &str = "valid_max";
/// Default range widening used by [`add_valid_range_attributes`]
pub const DEFAULT_BUFFER_FACTOR: f64 = 0.01;

/// Relative headroom added above `valid_max` so the top of the range does not
/// collide with the missing sentinel.
const VMAX_HEADROOM: f64 = 0.001;

/// Packing of one variable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackedEncoding {
    /// Quantization filter
    pub filter: ScaleOffset,
    /// Declared fill value (the buffered maximum)
    pub fill_value: f64,
}

/// Derives scale-offset filters at a fixed code width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packer {
    bits: u8,
}

impl Packer {
    /// Packer producing `bits`-wide codes (8, 16 or 32)
    pub fn new(bits: u8) -> Result<Self> {
        if !matches!(bits, 8 | 16 | 32) {
            return Err(Error::InvalidConfig(format!(
                "packing bits must be 8, 16 or 32, got {}",
                bits
            )));
        }
        Ok(Self { bits })
    }

    /// Code width
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Filter covering `[vmin, vmax]`
    pub fn scale_offset(&self, vmin: f64, vmax: f64) -> Result<ScaleOffset> {
        ScaleOffset::from_range(vmin, vmax, self.bits)
    }

    /// Packing for `var`, or `None` when it has no valid range
    pub fn encoding(&self, var: &Variable) -> Result<Option<PackedEncoding>> {
        let (Some(vmin), Some(vmax)) = (var.attr_f64(VALID_MIN_ATTR), var.attr_f64(VALID_MAX_ATTR)) else {
            debug!(variable = %var.name, "no valid range, not packing");
            return Ok(None);
        };
        let vmax = vmax + (vmax - vmin) * VMAX_HEADROOM;
        let filter = self.scale_offset(vmin, vmax)?;
        debug!(
            variable = %var.name,
            scale = filter.scale,
            offset = filter.offset,
            "packing variable"
        );
        Ok(Some(PackedEncoding {
            filter,
            fill_value: vmax,
        }))
    }
}

/// Set `valid_min`/`valid_max` on every variable from its data range
///
/// The range is widened by `buffer_factor` of its span on each side. A
/// constant field is widened by `buffer_factor` of its magnitude, or to
/// `[-0.01, 0.01]` when it is zero. Variables with no valid cells are
/// skipped.
pub fn add_valid_range_attributes(ds: &mut MemDataset, buffer_factor: f64) {
    let names: Vec<String> = ds.variables().iter().map(|v| v.name.clone()).collect();
    for name in names {
        let Some(var) = ds.variable_mut(&name) else {
            continue;
        };
        let (vmin, vmax) = var
            .data
            .iter()
            .filter(|v| !v.is_nan())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if vmin > vmax {
            debug!(variable = %name, "no valid cells, skipping range attributes");
            continue;
        }
        let (vmin, vmax) = if vmin != vmax {
            let buffer = (vmax - vmin) * buffer_factor;
            (vmin - buffer, vmax + buffer)
        } else if vmin == 0.0 {
            (-0.01, 0.01)
        } else {
            let buffer = vmin.abs() * buffer_factor;
            (vmin - buffer, vmax + buffer)
        };
        var.attrs.insert(VALID_MIN_ATTR.into(), vmin.into());
        var.attrs.insert(VALID_MAX_ATTR.into(), vmax.into());
        debug!(variable = %name, vmin, vmax, "added valid range");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridstore_core::{Attributes, Dataset};
    use ndarray::{ArrayD, IxDyn};

    fn var(values: Vec<f64>) -> Variable {
        let n = values.len();
        Variable::new("v", vec!["x".into()], ArrayD::from_shape_vec(IxDyn(&[n]), values).unwrap())
    }

    #[test]
    fn test_bits_validated() {
        assert!(Packer::new(16).is_ok());
        assert!(matches!(Packer::new(12), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_scale_offset_formula() {
        let packer = Packer::new(16).unwrap();
        let so = packer.scale_offset(0.0, 65_535.0).unwrap();
        assert_eq!(so.scale, 1.0);
        assert_eq!(so.offset, 32_768.0);
        assert_eq!(packer.scale_offset(3.0, 3.0).unwrap().scale, 1.0);
    }

    #[test]
    fn test_encoding_requires_valid_range() {
        let packer = Packer::new(8).unwrap();
        assert_eq!(packer.encoding(&var(vec![1.0])).unwrap(), None);

        let mut attrs = Attributes::new();
        attrs.insert(VALID_MIN_ATTR.into(), 0.0.into());
        attrs.insert(VALID_MAX_ATTR.into(), 10.0.into());
        let packed = packer.encoding(&var(vec![1.0]).with_attrs(attrs)).unwrap().unwrap();
        assert!((packed.fill_value - 10.01).abs() < 1e-12);
        assert_eq!(packed.filter.bits, 8);
        let restored = packed.filter.decode(packed.filter.encode(5.0));
        assert!((restored - 5.0).abs() <= packed.filter.scale);
    }

    #[test]
    fn test_add_valid_range_attributes() {
        let mut ds = MemDataset::new();
        ds.add_variable(var(vec![0.0, 10.0, f64::NAN])).unwrap();
        let mut zero = var(vec![0.0, 0.0]);
        zero.name = "zero".into();
        zero.dims = vec!["y".into()];
        ds.add_variable(zero).unwrap();
        let mut constant = var(vec![-4.0, -4.0]);
        constant.name = "constant".into();
        constant.dims = vec!["y".into()];
        ds.add_variable(constant).unwrap();

        add_valid_range_attributes(&mut ds, DEFAULT_BUFFER_FACTOR);
        let v = ds.variable("v").unwrap();
        assert!((v.attr_f64(VALID_MIN_ATTR).unwrap() + 0.1).abs() < 1e-12);
        assert!((v.attr_f64(VALID_MAX_ATTR).unwrap() - 10.1).abs() < 1e-12);
        let zero = ds.variable("zero").unwrap();
        assert_eq!(zero.attr_f64(VALID_MIN_ATTR), Some(-0.01));
        assert_eq!(zero.attr_f64(VALID_MAX_ATTR), Some(0.01));
        let constant = ds.variable("constant").unwrap();
        assert!((constant.attr_f64(VALID_MIN_ATTR).unwrap() + 4.04).abs() < 1e-12);
        assert!((constant.attr_f64(VALID_MAX_ATTR).unwrap() + 3.96).abs() < 1e-12);
    }
}
