//! Physical formula collaborators.
//!
//! Pure functions of time, location, temperature, and pressure that the
//! pipeline consumes at its derivation stage: dissolved-oxygen saturation,
//! mean solar time, and a first-order clear-sky PAR estimate. These are
//! standard published relationships; the pipeline depends only on the
//! signatures, so a caller can substitute its own implementations.

use crate::constants::MAX_SURFACE_PAR;
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Timelike, Utc};

/// Dissolved-oxygen saturation concentration in mg/L.
///
/// Garcia-Benson solubility at 1 atm, corrected for barometric pressure
/// with the Benson-Krause vapor-pressure term. Freshwater (zero salinity).
pub fn do_saturation_mgl(temp_c: f64, pressure_atm: f64) -> f64 {
    let ts = ((298.15 - temp_c) / (273.15 + temp_c)).ln();
    let ln_c = 2.00907 + 3.22014 * ts + 4.05010 * ts.powi(2) + 4.94457 * ts.powi(3)
        - 0.256847 * ts.powi(4)
        + 3.88767 * ts.powi(5);
    // Garcia-Benson yields mL/L; 1.42905 converts to mg/L.
    let sat_1atm = ln_c.exp() * 1.42905;

    let vapor = vapor_pressure_atm(temp_c);
    sat_1atm * (pressure_atm - vapor) / (1.0 - vapor)
}

/// Saturated water vapor pressure in atm (Benson & Krause 1980).
fn vapor_pressure_atm(temp_c: f64) -> f64 {
    let tk = temp_c + 273.15;
    (11.8571 - 3840.70 / tk - 216_961.0 / tk.powi(2)).exp()
}

/// Mean solar time at the given longitude: UTC shifted by 4 minutes per
/// degree.
pub fn mean_solar_time(utc: DateTime<Utc>, lon: f64) -> NaiveDateTime {
    utc.naive_utc() + Duration::seconds((lon * 240.0).round() as i64)
}

/// First-order clear-sky photosynthetically active radiation in
/// umol m^-2 s^-1: maximum surface PAR scaled by the cosine of the solar
/// zenith angle, zero below the horizon.
pub fn clear_sky_par(utc: DateTime<Utc>, lat: f64, lon: f64) -> f64 {
    let solar = mean_solar_time(utc, lon);
    let solar_hour = solar.hour() as f64
        + solar.minute() as f64 / 60.0
        + solar.second() as f64 / 3600.0;
    let hour_angle = (15.0 * (solar_hour - 12.0)).to_radians();

    let day_of_year = solar.ordinal() as f64;
    let declination =
        (23.45f64).to_radians() * ((2.0 * std::f64::consts::PI / 365.0) * (284.0 + day_of_year)).sin();

    let lat = lat.to_radians();
    let cos_zenith =
        lat.sin() * declination.sin() + lat.cos() * declination.cos() * hour_angle.cos();

    MAX_SURFACE_PAR * cos_zenith.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_do_saturation_reference_value() {
        // Accepted freshwater value at 20 C and sea-level pressure is
        // roughly 9.1 mg/L.
        let sat = do_saturation_mgl(20.0, 1.0);
        assert!((sat - 9.09).abs() < 0.15, "sat = {}", sat);
    }

    #[test]
    fn test_do_saturation_decreases_with_temperature() {
        assert!(do_saturation_mgl(5.0, 1.0) > do_saturation_mgl(25.0, 1.0));
    }

    #[test]
    fn test_do_saturation_scales_with_pressure() {
        assert!(do_saturation_mgl(20.0, 0.8) < do_saturation_mgl(20.0, 1.0));
    }

    #[test]
    fn test_mean_solar_time_shift() {
        let utc = Utc.with_ymd_and_hms(2023, 6, 21, 18, 0, 0).unwrap();
        // 90 degrees west is 6 hours behind UTC.
        let solar = mean_solar_time(utc, -90.0);
        assert_eq!(solar.hour(), 12);
        assert_eq!(solar.minute(), 0);
    }

    #[test]
    fn test_par_peaks_near_solar_noon() {
        let lat = 36.0;
        let lon = -79.0;
        // Solar noon at lon -79 is about 17:16 UTC.
        let noon = Utc.with_ymd_and_hms(2023, 6, 21, 17, 16, 0).unwrap();
        let midnight = Utc.with_ymd_and_hms(2023, 6, 21, 5, 16, 0).unwrap();

        let par_noon = clear_sky_par(noon, lat, lon);
        let par_midnight = clear_sky_par(midnight, lat, lon);
        assert!(par_noon > 1500.0, "par_noon = {}", par_noon);
        assert_eq!(par_midnight, 0.0);
    }

    #[test]
    fn test_par_never_negative() {
        let lat = 60.0;
        let lon = 0.0;
        for hour in 0..24 {
            let utc = Utc.with_ymd_and_hms(2023, 12, 21, hour, 0, 0).unwrap();
            assert!(clear_sky_par(utc, lat, lon) >= 0.0);
        }
    }
}
