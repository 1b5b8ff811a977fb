//! The hot path: what runs for every frame a registered filter accepts.
//!
//! Never allocates beyond what `CanFrame` already owns inline, never
//! returns an error — a failed send only increments the job's `dropped`
//! counter. Steps follow the fixed order: loop-avoidance check, full copy,
//! modification pipeline, checksum recomputation, destination send, owner
//! mark, counters, optional timestamp clearing, optional echo.

use std::sync::Arc;

use crate::device::CanDevice;
use crate::job::{JobFlags, JobRecord};

/// Forward one received frame through `job` onto `dst`.
pub fn dispatch(job: &Arc<JobRecord>, frame_in: crate::frame::CanFrame, dst: &dyn CanDevice) {
    // Step 1: loop avoidance. A frame this gateway itself emitted must never
    // be re-routed, or a pair of opposing jobs would forward it forever.
    if frame_in.is_gateway_originated() {
        return;
    }

    // Step 2: full copy. `CanFrame` is `Copy`, so "full copy" and "shallow
    // clone" are the same bit pattern here; a single move/copy suffices.
    let mut out = frame_in;

    // Step 3: modification pipeline, then checksum recomputation — in that
    // fixed order, so a checksum sees the already-modified frame.
    job.modifications.apply(&mut out);

    // Step 4: clear the receive timestamp unless the job was configured to
    // preserve it.
    if !job.flags.contains(JobFlags::SRC_TSTAMP) {
        out.rx_timestamp_ns = None;
    }

    // Step 5: stamp gateway ownership so a loopback onto another job's
    // filter is recognized and dropped at step 1.
    let out = out.marked();

    // Step 6: send to the destination device, passing ECHO through
    // unexamined, and counting the outcome.
    match dst.send(out, job.flags.contains(JobFlags::ECHO)) {
        Ok(()) => job.record_forwarded(),
        Err(_) => job.record_dropped(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{check_checksum_params, XorChecksum};
    use crate::error::Result;
    use crate::filter::Filter;
    use crate::job::{GatewayType, JobFlags, MatchKey, ModSpec};
    use crate::modify::{FieldMask, ModProgram, ModSlot};
    use parking_lot::Mutex;

    struct RecordingDevice {
        index: u32,
        sent: Mutex<Vec<crate::frame::CanFrame>>,
        fail: bool,
        echoed: Mutex<Vec<bool>>,
    }

    impl CanDevice for RecordingDevice {
        fn index(&self) -> u32 {
            self.index
        }
        fn name(&self) -> &str {
            "recording"
        }
        fn send(&self, frame: crate::frame::CanFrame, echo: bool) -> Result<()> {
            if self.fail {
                return Err(crate::error::GatewayError::MessageTooSmall);
            }
            self.sent.lock().push(frame);
            self.echoed.lock().push(echo);
            Ok(())
        }
    }

    fn plain_job() -> Arc<JobRecord> {
        Arc::new(JobRecord::new(
            1,
            GatewayType::CanToCan,
            MatchKey {
                src_index: 0,
                filter: Filter::any(),
            },
            1,
            JobFlags::empty(),
            ModSpec::default(),
        ))
    }

    #[test]
    fn gateway_originated_frames_are_dropped_before_dispatch() {
        let job = plain_job();
        let dst = RecordingDevice {
            index: 1,
            sent: Mutex::new(Vec::new()),
            fail: false,
            echoed: Mutex::new(Vec::new()),
        };
        let frame = crate::frame::CanFrame::received(0x100, 8, [0; 8], 0).marked();
        dispatch(&job, frame, &dst);
        assert!(dst.sent.lock().is_empty());
        assert_eq!(job.frame_count(), 0);
        assert_eq!(job.dropped_count(), 0);
    }

    #[test]
    fn pure_forward_preserves_payload_and_marks_owner() {
        let job = plain_job();
        let dst = RecordingDevice {
            index: 1,
            sent: Mutex::new(Vec::new()),
            fail: false,
            echoed: Mutex::new(Vec::new()),
        };
        let frame = crate::frame::CanFrame::received(0x100, 4, [1, 2, 3, 4, 0, 0, 0, 0], 99);
        dispatch(&job, frame, &dst);
        let sent = dst.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, 0x100);
        assert_eq!(sent[0].data, [1, 2, 3, 4, 0, 0, 0, 0]);
        assert!(sent[0].is_gateway_originated());
        assert_eq!(sent[0].rx_timestamp_ns, None);
        assert_eq!(job.frame_count(), 1);
    }

    #[test]
    fn src_tstamp_flag_preserves_receive_timestamp() {
        let job = Arc::new(JobRecord::new(
            1,
            GatewayType::CanToCan,
            MatchKey {
                src_index: 0,
                filter: Filter::any(),
            },
            1,
            JobFlags::SRC_TSTAMP,
            ModSpec::default(),
        ));
        let dst = RecordingDevice {
            index: 1,
            sent: Mutex::new(Vec::new()),
            fail: false,
            echoed: Mutex::new(Vec::new()),
        };
        let frame = crate::frame::CanFrame::received(1, 0, [0; 8], 42);
        dispatch(&job, frame, &dst);
        assert_eq!(dst.sent.lock()[0].rx_timestamp_ns, Some(42));
    }

    #[test]
    fn failed_send_increments_dropped_not_forwarded() {
        let job = plain_job();
        let dst = RecordingDevice {
            index: 1,
            sent: Mutex::new(Vec::new()),
            fail: true,
            echoed: Mutex::new(Vec::new()),
        };
        let frame = crate::frame::CanFrame::received(1, 0, [0; 8], 0);
        dispatch(&job, frame, &dst);
        assert_eq!(job.frame_count(), 0);
        assert_eq!(job.dropped_count(), 1);
    }

    #[test]
    fn echo_flag_passes_through_to_send_unexamined() {
        let echoing_job = Arc::new(JobRecord::new(
            1,
            GatewayType::CanToCan,
            MatchKey {
                src_index: 0,
                filter: Filter::any(),
            },
            1,
            JobFlags::ECHO,
            ModSpec::default(),
        ));
        let dst = RecordingDevice {
            index: 1,
            sent: Mutex::new(Vec::new()),
            fail: false,
            echoed: Mutex::new(Vec::new()),
        };
        dispatch(&echoing_job, crate::frame::CanFrame::received(1, 0, [0; 8], 0), &dst);
        assert_eq!(dst.echoed.lock()[0], true);

        let plain = plain_job();
        dispatch(&plain, crate::frame::CanFrame::received(1, 0, [0; 8], 0), &dst);
        assert_eq!(dst.echoed.lock()[1], false);
    }

    #[test]
    fn modification_then_checksum_runs_in_fixed_order() {
        check_checksum_params(0, 1, 2).unwrap();
        let set = ModSlot::new(FieldMask::new(FieldMask::DATA), crate::frame::CanFrame::template(0, 0, [0xAA, 0xBB, 0, 0, 0, 0, 0, 0]));
        let program = ModProgram::build(ModSlot::inactive(), ModSlot::inactive(), ModSlot::inactive(), set);
        let xor = XorChecksum {
            from_idx: 0,
            to_idx: 1,
            result_idx: 2,
            init_xor: 0,
        };
        let job = Arc::new(JobRecord::new(
            1,
            GatewayType::CanToCan,
            MatchKey {
                src_index: 0,
                filter: Filter::any(),
            },
            1,
            JobFlags::empty(),
            ModSpec {
                program,
                xor: Some(xor),
                crc8: None,
            },
        ));
        let dst = RecordingDevice {
            index: 1,
            sent: Mutex::new(Vec::new()),
            fail: false,
            echoed: Mutex::new(Vec::new()),
        };
        let frame = crate::frame::CanFrame::received(1, 8, [0; 8], 0);
        dispatch(&job, frame, &dst);
        let sent = dst.sent.lock();
        assert_eq!(sent[0].data[2], 0xAA ^ 0xBB);
    }
}
