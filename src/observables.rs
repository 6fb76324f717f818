//! The observable record streamed by each SDR worker.
//!
//! The worker writes a raw concatenation of these records on the supervisor
//! socket, one record per [SdrObservable::SIZE] bytes, no framing. The
//! layout is the canonical little-endian form of GNSS-SDR's synchro dump:
//! explicit field widths, booleans as single bytes, so the stream means the
//! same thing regardless of the compiler that built either side.

use crate::wire::{Reader, Writer};

/// One satellite's measurements at one epoch, as produced by a worker
/// channel: acquisition, tracking and telemetry stages in one record.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SdrObservable {
    // Satellite and signal info
    pub system: u8,
    pub signal: [u8; 3],
    pub prn: u32,
    pub channel_id: i32,

    // Acquisition
    pub acq_delay_samples: f64,
    pub acq_doppler_hz: f64,
    pub acq_samplestamp_samples: u64,
    pub valid_acquisition: bool,

    // Tracking
    pub prompt_i: f64,
    pub prompt_q: f64,
    pub cn0_db_hz: f64,
    pub carrier_doppler_hz: f64,
    pub carrier_phase_rads: f64,
    pub code_phase_secs: f64,
    pub tracking_timestamp_secs: f64,
    pub valid_tracking: bool,

    // Telemetry decoder
    pub prn_timestamp_ms: f64,
    pub prn_timestamp_at_preamble_ms: f64,
    pub valid_word: bool,
    pub preamble: bool,
    pub tow: f64,
    pub tow_at_current_symbol: f64,
    pub tow_hybrid_at_current_symbol: f64,
    pub pseudorange_m: f64,
    pub valid_pseudorange: bool,
}

impl SdrObservable {
    /// Encoded record size. The session extracts whole records at exactly
    /// this stride.
    pub const SIZE: usize = 145;

    pub fn decode(data: &[u8]) -> Self {
        debug_assert!(data.len() >= Self::SIZE);
        let mut r = Reader::new(data);

        let out = Self {
            system: r.u8(),
            signal: r.bytes(),
            prn: r.u32(),
            channel_id: r.i32(),

            acq_delay_samples: r.f64(),
            acq_doppler_hz: r.f64(),
            acq_samplestamp_samples: r.u64(),
            valid_acquisition: r.bool(),

            prompt_i: r.f64(),
            prompt_q: r.f64(),
            cn0_db_hz: r.f64(),
            carrier_doppler_hz: r.f64(),
            carrier_phase_rads: r.f64(),
            code_phase_secs: r.f64(),
            tracking_timestamp_secs: r.f64(),
            valid_tracking: r.bool(),

            prn_timestamp_ms: r.f64(),
            prn_timestamp_at_preamble_ms: r.f64(),
            valid_word: r.bool(),
            preamble: r.bool(),
            tow: r.f64(),
            tow_at_current_symbol: r.f64(),
            tow_hybrid_at_current_symbol: r.f64(),
            pseudorange_m: r.f64(),
            valid_pseudorange: r.bool(),
        };

        debug_assert_eq!(r.position(), Self::SIZE);
        out
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        let mut w = Writer::new(&mut out);

        w.u8(self.system);
        w.bytes(&self.signal);
        w.u32(self.prn);
        w.i32(self.channel_id);

        w.f64(self.acq_delay_samples);
        w.f64(self.acq_doppler_hz);
        w.u64(self.acq_samplestamp_samples);
        w.bool(self.valid_acquisition);

        w.f64(self.prompt_i);
        w.f64(self.prompt_q);
        w.f64(self.cn0_db_hz);
        w.f64(self.carrier_doppler_hz);
        w.f64(self.carrier_phase_rads);
        w.f64(self.code_phase_secs);
        w.f64(self.tracking_timestamp_secs);
        w.bool(self.valid_tracking);

        w.f64(self.prn_timestamp_ms);
        w.f64(self.prn_timestamp_at_preamble_ms);
        w.bool(self.valid_word);
        w.bool(self.preamble);
        w.f64(self.tow);
        w.f64(self.tow_at_current_symbol);
        w.f64(self.tow_hybrid_at_current_symbol);
        w.f64(self.pseudorange_m);
        w.bool(self.valid_pseudorange);

        debug_assert_eq!(w.position(), Self::SIZE);
        out
    }
}

#[cfg(test)]
mod test {
    use super::SdrObservable;

    pub(crate) fn gps_l1_observable(prn: u32) -> SdrObservable {
        SdrObservable {
            system: b'G',
            signal: *b"1C\0",
            prn,
            channel_id: prn as i32 - 1,
            cn0_db_hz: 43.5,
            carrier_doppler_hz: -1523.25,
            carrier_phase_rads: 12.566370614359172,
            tracking_timestamp_secs: 512.25,
            valid_tracking: true,
            valid_word: true,
            tow: 345_600.0,
            pseudorange_m: 21_234_567.89,
            valid_pseudorange: true,
            ..Default::default()
        }
    }

    #[test]
    fn record_size_matches_layout() {
        // 12 header + 25 acquisition + 57 tracking + 51 telemetry
        assert_eq!(SdrObservable::SIZE, 145);
        let encoded = gps_l1_observable(7).encode();
        assert_eq!(encoded.len(), SdrObservable::SIZE);
    }

    #[test]
    fn round_trip() {
        let obs = gps_l1_observable(23);
        assert_eq!(SdrObservable::decode(&obs.encode()), obs);
    }

    #[test]
    fn nonzero_bool_bytes_decode_true() {
        let mut encoded = gps_l1_observable(1).encode();
        // valid_pseudorange is the final byte
        encoded[SdrObservable::SIZE - 1] = 0x7F;
        assert!(SdrObservable::decode(&encoded).valid_pseudorange);
    }
}
