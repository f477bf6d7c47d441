use maskcorr::fft::{Spectrum, Transform};
use maskcorr::{
    CorrelationConfig, MaskCorrError, MaskCorrResult, MaskedCorrelator, NdImage,
    RustFftTransform, Shape,
};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Delegating transform that counts forward calls.
#[derive(Default)]
struct CountingTransform {
    inner: RustFftTransform,
    forward_calls: AtomicUsize,
}

impl CountingTransform {
    fn forward_calls(&self) -> usize {
        self.forward_calls.load(Ordering::SeqCst)
    }
}

impl Transform for CountingTransform {
    fn forward(&self, input: &[f64], shape: &Shape) -> MaskCorrResult<Spectrum> {
        self.forward_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.forward(input, shape)
    }

    fn inverse(&self, spectrum: Spectrum) -> MaskCorrResult<Vec<f64>> {
        self.inner.inverse(spectrum)
    }

    fn max_prime_factor(&self) -> usize {
        self.inner.max_prime_factor()
    }
}

/// Transform that returns a truncated inverse.
struct TruncatingTransform(RustFftTransform);

impl Transform for TruncatingTransform {
    fn forward(&self, input: &[f64], shape: &Shape) -> MaskCorrResult<Spectrum> {
        self.0.forward(input, shape)
    }

    fn inverse(&self, spectrum: Spectrum) -> MaskCorrResult<Vec<f64>> {
        let mut out = self.0.inverse(spectrum)?;
        out.pop();
        Ok(out)
    }
}

/// Transform whose inverse output is entirely NaN.
struct NanInverseTransform(RustFftTransform);

impl Transform for NanInverseTransform {
    fn forward(&self, input: &[f64], shape: &Shape) -> MaskCorrResult<Spectrum> {
        self.0.forward(input, shape)
    }

    fn inverse(&self, spectrum: Spectrum) -> MaskCorrResult<Vec<f64>> {
        let out = self.0.inverse(spectrum)?;
        Ok(vec![f64::NAN; out.len()])
    }
}

fn pattern(width: usize, height: usize, seed: usize) -> NdImage<u8> {
    let mut data = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            data.push((((x + seed) * 13) ^ (y * 7) ^ (x * y)) as u8);
        }
    }
    NdImage::from_vec_2d(data, width, height).unwrap()
}

type Engine<'a> = MaskedCorrelator<'a, u8, u8, &'a CountingTransform>;

#[test]
fn results_are_computed_lazily_and_cached() {
    let transform = CountingTransform::default();
    let fixed = pattern(12, 10, 0);
    let moving = pattern(5, 4, 3);
    let mut engine: Engine<'_> = MaskedCorrelator::new(&transform);

    engine.set_fixed_image(&fixed).unwrap();
    engine.set_moving_image(&moving).unwrap();
    assert_eq!(transform.forward_calls(), 0);
    assert!(!engine.is_up_to_date());

    assert_eq!(engine.surface().unwrap().dims(), &[16, 13]);
    assert_eq!(transform.forward_calls(), 6);
    assert!(engine.is_up_to_date());

    assert_eq!(engine.maximum_number_of_overlapping_pixels().unwrap(), 20);
    assert_eq!(engine.effective_required_overlap().unwrap(), 0);
    assert_eq!(transform.forward_calls(), 6);
}

#[test]
fn unchanged_setters_keep_the_cache() {
    let transform = CountingTransform::default();
    let fixed = pattern(8, 8, 1);
    let moving = pattern(4, 4, 2);
    let mut engine: Engine<'_> = MaskedCorrelator::new(&transform);
    engine.set_fixed_image(&fixed).unwrap();
    engine.set_moving_image(&moving).unwrap();
    engine.output().unwrap();

    engine.set_fixed_image(&fixed).unwrap();
    engine.set_required_number_of_overlapping_pixels(0);
    engine.set_required_fraction_of_overlapping_pixels(0.0).unwrap();
    engine.set_config(CorrelationConfig::default()).unwrap();
    engine.clear_fixed_mask();
    assert!(engine.is_up_to_date());
    engine.output().unwrap();
    assert_eq!(transform.forward_calls(), 6);
}

#[test]
fn changed_inputs_trigger_recomputation() {
    let transform = CountingTransform::default();
    let fixed = pattern(8, 8, 1);
    let other = pattern(8, 8, 5);
    let moving = pattern(4, 4, 2);
    let mask = NdImage::filled(&[4, 4], 1u8).unwrap();
    let mut engine: Engine<'_> = MaskedCorrelator::new(&transform);
    engine.set_fixed_image(&fixed).unwrap();
    engine.set_moving_image(&moving).unwrap();
    engine.output().unwrap();

    engine.set_required_number_of_overlapping_pixels(8);
    assert!(!engine.is_up_to_date());
    assert_eq!(engine.effective_required_overlap().unwrap(), 8);
    assert_eq!(transform.forward_calls(), 12);

    engine.set_required_fraction_of_overlapping_pixels(1.0).unwrap();
    assert_eq!(engine.effective_required_overlap().unwrap(), 16);
    assert_eq!(transform.forward_calls(), 18);

    engine.set_fixed_image(&other).unwrap();
    engine.output().unwrap();
    assert_eq!(transform.forward_calls(), 24);

    engine.set_moving_mask(&mask).unwrap();
    engine.output().unwrap();
    engine.clear_moving_mask();
    engine.output().unwrap();
    assert_eq!(transform.forward_calls(), 36);
}

#[test]
fn fraction_threshold_zeroes_low_overlap_shifts() {
    let transform = CountingTransform::default();
    let fixed = pattern(6, 6, 0);
    let mut engine: Engine<'_> = MaskedCorrelator::new(&transform);
    engine.set_fixed_image(&fixed).unwrap();
    engine.set_moving_image(&fixed).unwrap();
    engine.set_required_fraction_of_overlapping_pixels(1.0).unwrap();

    let out = engine.output().unwrap();
    assert_eq!(out.max_overlap(), 36);
    assert_eq!(out.effective_required_overlap(), 36);
    let nonzero: Vec<usize> = out
        .surface()
        .data()
        .iter()
        .enumerate()
        .filter(|&(_, &v)| v != 0.0)
        .map(|(i, _)| i)
        .collect();
    let zero = out.surface().shape().flat_index(out.zero_shift_index()).unwrap();
    assert_eq!(nonzero, vec![zero]);
}

#[test]
fn setters_validate_what_they_can() {
    let transform = CountingTransform::default();
    let fixed = pattern(6, 5, 0);
    let bad_mask = NdImage::filled(&[5, 6], 1u8).unwrap();
    let volume = NdImage::filled(&[3, 3, 3], 1u8).unwrap();
    let mut engine: Engine<'_> = MaskedCorrelator::new(&transform);

    engine.set_fixed_image(&fixed).unwrap();
    assert!(matches!(
        engine.set_fixed_mask(&bad_mask),
        Err(MaskCorrError::MaskExtentMismatch { role: "fixed", .. })
    ));
    assert_eq!(
        engine.set_required_fraction_of_overlapping_pixels(-0.1),
        Err(MaskCorrError::InvalidFraction(-0.1))
    );
    assert_eq!(
        engine.set_moving_image(&volume),
        Err(MaskCorrError::DimensionMismatch {
            fixed: 2,
            moving: 3
        })
    );
    assert_eq!(
        engine.output().map(|_| ()),
        Err(MaskCorrError::MissingInput("moving image"))
    );
    assert_eq!(transform.forward_calls(), 0);
}

#[test]
fn mask_set_before_image_is_checked_on_image() {
    let transform = CountingTransform::default();
    let moving = pattern(4, 4, 0);
    let mask = NdImage::filled(&[3, 4], 1u8).unwrap();
    let mut engine: Engine<'_> = MaskedCorrelator::new(&transform);
    engine.set_moving_mask(&mask).unwrap();
    assert!(matches!(
        engine.set_moving_image(&moving),
        Err(MaskCorrError::MaskExtentMismatch { role: "moving", .. })
    ));
}

#[test]
fn invalid_config_surfaces_on_request() {
    let transform = CountingTransform::default();
    let fixed = pattern(4, 4, 0);
    let config = CorrelationConfig {
        anomaly_tolerance: -1.0,
        ..CorrelationConfig::default()
    };
    let mut engine: Engine<'_> = MaskedCorrelator::new(&transform).with_config(config.clone());
    engine.set_fixed_image(&fixed).unwrap();
    engine.set_moving_image(&fixed).unwrap();
    assert_eq!(
        engine.output().map(|_| ()),
        Err(MaskCorrError::InvalidTolerance {
            name: "anomaly_tolerance",
            value: -1.0
        })
    );
    assert!(engine.set_config(config).is_err());
}

#[test]
fn malformed_transform_output_is_reported() {
    let fixed = pattern(5, 5, 0);
    let mut engine: MaskedCorrelator<'_, u8, u8, TruncatingTransform> =
        MaskedCorrelator::new(TruncatingTransform(RustFftTransform::new()));
    engine.set_fixed_image(&fixed).unwrap();
    engine.set_moving_image(&fixed).unwrap();
    let err = engine.output().map(|_| ()).unwrap_err();
    assert!(matches!(err, MaskCorrError::TransformShapeMismatch { .. }));
    assert!(!err.is_configuration());
}

#[test]
fn non_finite_transform_output_is_reported_as_anomalies() {
    let fixed = pattern(4, 4, 0);
    let mut engine: MaskedCorrelator<'_, u8, u8, NanInverseTransform> =
        MaskedCorrelator::new(NanInverseTransform(RustFftTransform::new()));
    engine.set_fixed_image(&fixed).unwrap();
    engine.set_moving_image(&fixed).unwrap();

    let out = engine.output().unwrap();
    assert_eq!(out.anomalies().len(), 49);
    assert!(out.anomalies().iter().all(|a| a.value.is_nan()));
    assert!(out.surface().data().iter().all(|&v| v == 0.0));
    assert!(matches!(
        out.check(),
        Err(MaskCorrError::NumericalAnomaly { count: 49, .. })
    ));
}

#[test]
fn non_finite_samples_are_reported_unless_masked_out() {
    let mut data: Vec<f64> = (0..36).map(|v| ((v * 7) % 11) as f64).collect();
    data[14] = f64::NAN;
    let fixed = NdImage::new(data, &[6, 6]).unwrap();
    let moving = NdImage::new((0..9).map(|v| v as f64).collect(), &[3, 3]).unwrap();
    let mut mask_data = vec![1u8; 36];
    mask_data[14] = 0;
    let mask = NdImage::new(mask_data, &[6, 6]).unwrap();

    let mut engine: MaskedCorrelator<'_, f64> = MaskedCorrelator::new(RustFftTransform::new());
    engine.set_fixed_image(&fixed).unwrap();
    engine.set_moving_image(&moving).unwrap();
    let out = engine.output().unwrap();
    assert!(!out.anomalies().is_empty());
    assert!(out.check().is_err());
    assert!(out.surface().data().iter().all(|v| v.is_finite()));

    engine.set_fixed_mask(&mask).unwrap();
    let out = engine.output().unwrap();
    assert!(out.anomalies().is_empty());
    assert_eq!(out.check(), Ok(()));
}

#[test]
fn default_backend_engine_reuses_with_new_extents() {
    let a = pattern(10, 7, 0);
    let b = pattern(3, 3, 1);
    let c = pattern(6, 9, 2);
    let mut engine: MaskedCorrelator<'_, u8> = MaskedCorrelator::new(RustFftTransform::new());
    engine.set_fixed_image(&a).unwrap();
    engine.set_moving_image(&b).unwrap();
    assert_eq!(engine.surface().unwrap().dims(), &[12, 9]);
    engine.set_moving_image(&c).unwrap();
    assert_eq!(engine.surface().unwrap().dims(), &[15, 15]);
    assert_eq!(engine.maximum_number_of_overlapping_pixels().unwrap(), 42);
}
