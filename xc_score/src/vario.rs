//! Smoothed vertical rate of a track and the climb-rate colour ramp used to draw it.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::smooth::{smooth, Kernel};
use crate::track::Track;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VarioParams {
    /// Smoothing window in samples.
    pub window: usize,
    pub kernel: Kernel,
}

impl Default for VarioParams {
    fn default() -> Self {
        Self {
            window: 20,
            kernel: Kernel::Binomial,
        }
    }
}

/// Climb rate in m/s for every segment `d-1 → d` of the track, from smoothed GPS altitude.
///
/// Zero-length segments (duplicate timestamps) report 0.
pub fn climb_rates(track: &Track, params: &VarioParams) -> Vec<f64> {
    let kernel = params.kernel;
    let altitude = smooth(&track.gps_altitudes(), params.window, |n| kernel.weights(n)).to_vec();
    track
        .fixes()
        .windows(2)
        .zip(altitude.windows(2))
        .map(|(fixes, alt)| {
            let dt = (fixes[1].time - fixes[0].time).num_milliseconds() as f64 / 1000.0;
            if dt > 0.0 {
                (alt[1] - alt[0]) / dt
            } else {
                0.0
            }
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// KML colour notation: `aabbggrr`.
    pub fn kml_hex(&self, alpha: u8) -> String {
        format!("{:02x}{:02x}{:02x}{:02x}", alpha, self.b, self.g, self.r)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColorStop {
    pub value: f64,
    pub color: Rgb,
}

impl ColorStop {
    pub const fn new(value: f64, r: u8, g: u8, b: u8) -> Self {
        Self {
            value,
            color: Rgb { r, g, b },
        }
    }
}

/// Piecewise-linear mapping from climb rate (m/s) to colour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColorRamp {
    stops: Vec<ColorStop>,
}

impl ColorRamp {
    pub fn new(mut stops: Vec<ColorStop>) -> Self {
        stops.sort_by_key(|stop| OrderedFloat(stop.value));
        Self { stops }
    }

    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }

    /// Colour for `value`, interpolated between the nearest stops below and above it.
    ///
    /// Values outside the ramp take the colour of the closest end. `None` only for an empty
    /// ramp.
    pub fn color(&self, value: f64) -> Option<Rgb> {
        let mut lower: Option<&ColorStop> = None;
        let mut upper: Option<&ColorStop> = None;
        for stop in &self.stops {
            if stop.value <= value && lower.map_or(true, |l| l.value <= stop.value) {
                lower = Some(stop);
            }
            if stop.value >= value && upper.map_or(true, |u| u.value > stop.value) {
                upper = Some(stop);
            }
        }

        match (lower, upper) {
            (Some(lo), Some(hi)) if hi.value > lo.value => {
                let mix = (value - lo.value) / (hi.value - lo.value);
                let channel =
                    |a: u8, b: u8| (mix * f64::from(b) + f64::from(a) - mix * f64::from(a)) as u8;
                Some(Rgb {
                    r: channel(lo.color.r, hi.color.r),
                    g: channel(lo.color.g, hi.color.g),
                    b: channel(lo.color.b, hi.color.b),
                })
            }
            (_, Some(hi)) => Some(hi.color),
            (Some(lo), None) => Some(lo.color),
            (None, None) => None,
        }
    }
}

impl Default for ColorRamp {
    fn default() -> Self {
        Self::new(vec![
            ColorStop::new(-6.0, 50, 50, 50),
            ColorStop::new(-3.0, 0, 0, 128),
            ColorStop::new(-1.0, 0, 128, 128),
            ColorStop::new(0.0, 200, 200, 200),
            ColorStop::new(1.0, 186, 186, 0),
            ColorStop::new(2.0, 222, 0, 0),
            ColorStop::new(4.0, 186, 0, 186),
        ])
    }
}
