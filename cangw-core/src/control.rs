//! The control plane: validates and installs/removes routing rules, and
//! answers introspection queries. This is the only place that touches the
//! `DeviceRegistry`/`DeliverySubsystem` traits directly outside of dispatch
//! itself — everything here runs at human/API timescales, never per-frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::checksum::{check_checksum_params, Crc8Checksum, XorChecksum};
use crate::device::{DeliverySubsystem, DeviceRegistry};
use crate::dispatch::dispatch;
use crate::error::{GatewayError, Result};
use crate::filter::Filter;
use crate::job::{GatewayType, JobFlags, JobRecord, MatchKey, ModSpec, GWTYPE_CAN_CAN};
use crate::modify::ModSlot;
use crate::table::JobTable;

/// Protocol family selector from the create/delete header, mirroring the
/// wire-level discriminant a real control socket would carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Can,
}

/// Wire value of `Family::Can` in the create/delete header's `family` field.
pub const FAMILY_CAN: u16 = 29;

impl Family {
    pub fn parse(raw: u16) -> Result<Self> {
        match raw {
            FAMILY_CAN => Ok(Family::Can),
            _ => Err(GatewayError::ProtocolFamilyNotSupported),
        }
    }
}

/// Everything needed to install one CAN-to-CAN routing rule. `family` and
/// `gwtype` mirror the wire header's two cheap-to-reject fields (§4.5): a
/// `create` call validates both before anything else.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub family: u16,
    pub gwtype: u8,
    pub src_index: u32,
    pub dst_index: u32,
    pub filter: Filter,
    pub flags: JobFlags,
    pub and: ModSlot,
    pub or: ModSlot,
    pub xor: ModSlot,
    pub set: ModSlot,
    pub xor_checksum: Option<XorChecksum>,
    pub crc8_checksum: Option<Crc8Checksum>,
}

impl Default for CreateRequest {
    fn default() -> Self {
        CreateRequest {
            family: FAMILY_CAN,
            gwtype: GWTYPE_CAN_CAN,
            src_index: 0,
            dst_index: 0,
            filter: Filter::any(),
            flags: JobFlags::empty(),
            and: ModSlot::inactive(),
            or: ModSlot::inactive(),
            xor: ModSlot::inactive(),
            set: ModSlot::inactive(),
            xor_checksum: None,
            crc8_checksum: None,
        }
    }
}

/// Delete by the same installed-rule identity a real control socket would
/// carry on its `DEL` request: `SRC_IF`/`DST_IF`, filter, flags, modification
/// slots, and checksum specs. `src_index == 0 && dst_index == 0` is the wire
/// format's special case for "remove everything".
///
/// `job_id`-based deletion (`GatewayControl::delete_by_id`) is also
/// available as a Rust-idiomatic convenience once a caller already has an
/// id from `dump` — see DESIGN.md for why both exist.
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub src_index: u32,
    pub dst_index: u32,
    pub filter: Filter,
    pub flags: JobFlags,
    pub and: ModSlot,
    pub or: ModSlot,
    pub xor: ModSlot,
    pub set: ModSlot,
    pub xor_checksum: Option<XorChecksum>,
    pub crc8_checksum: Option<Crc8Checksum>,
}

impl Default for DeleteRequest {
    fn default() -> Self {
        DeleteRequest {
            src_index: 0,
            dst_index: 0,
            filter: Filter::any(),
            flags: JobFlags::empty(),
            and: ModSlot::inactive(),
            or: ModSlot::inactive(),
            xor: ModSlot::inactive(),
            set: ModSlot::inactive(),
            xor_checksum: None,
            crc8_checksum: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeleteByIdRequest {
    pub job_id: u64,
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct DumpEntry {
    pub job_id: u64,
    pub match_key: MatchKey,
    pub dst_index: u32,
    pub frame_count: u64,
    pub dropped_count: u64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DumpResponse {
    pub entries: Vec<DumpEntry>,
}

/// How long `delete` waits for in-flight dispatches referencing the removed
/// job's snapshot to drain before tearing down its registration.
const DEFAULT_BARRIER_TIMEOUT: Duration = Duration::from_millis(250);

/// Ties the pure `JobTable` to the live device registry and delivery
/// subsystem: the thing an HTTP handler or CLI command actually calls.
pub struct GatewayControl {
    devices: Arc<dyn DeviceRegistry>,
    delivery: Arc<dyn DeliverySubsystem>,
    table: JobTable,
    next_job_id: AtomicU64,
}

impl GatewayControl {
    pub fn new(devices: Arc<dyn DeviceRegistry>, delivery: Arc<dyn DeliverySubsystem>) -> Self {
        GatewayControl {
            devices,
            delivery,
            table: JobTable::new(),
            next_job_id: AtomicU64::new(1),
        }
    }

    /// Validate and install a new routing rule. Validation runs cheapest
    /// first, device resolution last (§4.5): header (`family`, `gwtype`),
    /// then non-zero indices, then checksum index bounds for any *enabled*
    /// checksum regardless of whether the modification program is otherwise
    /// empty, and only then are `src`/`dst` looked up — a later failure
    /// would otherwise have to release references already acquired.
    pub fn create(&self, req: CreateRequest) -> Result<u64> {
        Family::parse(req.family)?;
        let gateway_type = GatewayType::parse(req.gwtype)?;

        if req.src_index == 0 || req.dst_index == 0 {
            return Err(GatewayError::invalid("src_index and dst_index must both be non-zero"));
        }

        if let Some(xor) = &req.xor_checksum {
            if xor.is_enabled() {
                check_checksum_params(xor.from_idx, xor.to_idx, xor.result_idx)?;
            }
        }
        if let Some(crc8) = &req.crc8_checksum {
            if crc8.is_enabled() {
                check_checksum_params(crc8.from_idx, crc8.to_idx, crc8.result_idx)?;
            }
        }

        let src = self
            .devices
            .device(req.src_index)
            .ok_or(GatewayError::NoSuchDevice {
                index: req.src_index,
            })?;
        let dst = self
            .devices
            .device(req.dst_index)
            .ok_or(GatewayError::NoSuchDevice {
                index: req.dst_index,
            })?;

        let program = crate::modify::ModProgram::build(req.and, req.or, req.xor, req.set);
        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let job = Arc::new(JobRecord::new(
            job_id,
            gateway_type,
            MatchKey {
                src_index: req.src_index,
                filter: req.filter,
            },
            req.dst_index,
            req.flags,
            ModSpec {
                program,
                xor: req.xor_checksum,
                crc8: req.crc8_checksum,
            },
        ));

        let callback_job = job.clone();
        let dst_for_callback = dst.clone();
        let registration = self.delivery.register_rx(
            req.src_index,
            req.filter,
            Arc::new(move |frame| dispatch(&callback_job, frame, dst_for_callback.as_ref())),
        )?;
        job.set_registration(registration);

        self.table.insert(job);
        let _ = src; // resolved only to confirm it exists; dispatch reads from `dst`.
        Ok(job_id)
    }

    /// Remove a job by id. Waits (bounded) for any dispatch already in
    /// flight against the old snapshot to finish before unregistering the
    /// job's receive filter, so a frame mid-dispatch never calls into a
    /// torn-down registration.
    pub fn delete_by_id(&self, req: DeleteByIdRequest) -> Result<()> {
        let removed = self
            .table
            .remove(req.job_id)
            .ok_or_else(|| GatewayError::invalid(format!("no such job: {}", req.job_id)))?;
        self.unregister_after_barrier(std::iter::once(removed));
        Ok(())
    }

    /// Remove by installed-rule identity, matching the control-plane wire
    /// contract: both indices zero deletes every job, otherwise the first
    /// job whose `(flags, mod, match_key, dst_index)` is byte-equal to the
    /// request's is removed. Returns `invalid-argument` if nothing matches.
    pub fn delete(&self, req: DeleteRequest) -> Result<()> {
        if req.src_index == 0 && req.dst_index == 0 {
            let removed = self.table.remove_all();
            self.unregister_after_barrier(removed);
            return Ok(());
        }

        let program = crate::modify::ModProgram::build(req.and, req.or, req.xor, req.set);
        let target = MatchKey {
            src_index: req.src_index,
            filter: req.filter,
        };
        let removed = self
            .table
            .remove_first_match(|j| {
                j.flags == req.flags
                    && j.modifications.program == program
                    && j.modifications.xor == req.xor_checksum
                    && j.modifications.crc8 == req.crc8_checksum
                    && j.match_key == target
                    && j.dst_index == req.dst_index
            })
            .ok_or_else(|| GatewayError::invalid("no job matches the given template"))?;
        self.unregister_after_barrier(std::iter::once(removed));
        Ok(())
    }

    fn unregister_after_barrier(&self, removed: impl IntoIterator<Item = Arc<JobRecord>>) {
        let removed: Vec<_> = removed.into_iter().collect();
        if removed.is_empty() {
            return;
        }
        self.table.barrier(DEFAULT_BARRIER_TIMEOUT);
        for job in removed {
            if let Some(registration) = job.registration() {
                self.delivery
                    .unregister_rx(job.match_key.src_index, registration);
            }
        }
    }

    /// Called when a device disappears (unplugged, closed): cascades into
    /// removing every job sourced from it, same barrier-then-unregister
    /// sequence as a single `delete`.
    pub fn on_device_unregister(&self, device_index: u32) {
        let removed = self.table.remove_by_device(device_index);
        self.unregister_after_barrier(removed);
    }

    pub fn dump(&self) -> DumpResponse {
        let snapshot = self.table.snapshot();
        let entries = snapshot
            .iter()
            .map(|job| DumpEntry {
                job_id: job.id,
                match_key: job.match_key,
                dst_index: job.dst_index,
                frame_count: job.frame_count(),
                dropped_count: job.dropped_count(),
            })
            .collect();
        DumpResponse { entries }
    }

    pub fn job_count(&self) -> usize {
        self.table.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CanFrame;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct TestDevice {
        index: u32,
        sent: Mutex<Vec<CanFrame>>,
    }
    impl crate::device::CanDevice for TestDevice {
        fn index(&self) -> u32 {
            self.index
        }
        fn name(&self) -> &str {
            "test"
        }
        fn send(&self, frame: CanFrame, _echo: bool) -> Result<()> {
            self.sent.lock().push(frame);
            Ok(())
        }
    }

    struct TestRegistry {
        devices: HashMap<u32, Arc<dyn crate::device::CanDevice>>,
    }
    impl DeviceRegistry for TestRegistry {
        fn device(&self, index: u32) -> Option<Arc<dyn crate::device::CanDevice>> {
            self.devices.get(&index).cloned()
        }
    }

    struct TestDelivery {
        callbacks: Mutex<HashMap<u64, crate::device::RxCallback>>,
        next_id: AtomicU64,
    }
    impl TestDelivery {
        fn new() -> Self {
            TestDelivery {
                callbacks: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }
        }
        fn inject(&self, frame: CanFrame) {
            for cb in self.callbacks.lock().values() {
                cb(frame);
            }
        }
    }
    impl DeliverySubsystem for TestDelivery {
        fn register_rx(
            &self,
            _device_index: u32,
            _filter: Filter,
            callback: crate::device::RxCallback,
        ) -> Result<crate::device::RegistrationId> {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.callbacks.lock().insert(id, callback);
            Ok(crate::device::RegistrationId(id))
        }
        fn unregister_rx(&self, _device_index: u32, registration: crate::device::RegistrationId) {
            self.callbacks.lock().remove(&registration.0);
        }
    }

    fn harness() -> (GatewayControl, Arc<TestDevice>, Arc<TestDevice>, Arc<TestDelivery>) {
        let src = Arc::new(TestDevice {
            index: 1,
            sent: Mutex::new(Vec::new()),
        });
        let dst = Arc::new(TestDevice {
            index: 2,
            sent: Mutex::new(Vec::new()),
        });
        let mut devices: HashMap<u32, Arc<dyn crate::device::CanDevice>> = HashMap::new();
        devices.insert(1, src.clone());
        devices.insert(2, dst.clone());
        let registry = Arc::new(TestRegistry { devices });
        let delivery = Arc::new(TestDelivery::new());
        let control = GatewayControl::new(registry, delivery.clone());
        (control, src, dst, delivery)
    }

    #[test]
    fn create_rejects_unknown_device() {
        let (control, _src, _dst, _delivery) = harness();
        let req = CreateRequest {
            src_index: 99,
            dst_index: 2,
            ..CreateRequest::default()
        };
        assert!(matches!(control.create(req), Err(GatewayError::NoSuchDevice { index: 99 })));
    }

    #[test]
    fn create_rejects_unsupported_family() {
        let (control, _src, _dst, _delivery) = harness();
        let req = CreateRequest {
            family: 0,
            src_index: 1,
            dst_index: 2,
            ..CreateRequest::default()
        };
        assert!(matches!(control.create(req), Err(GatewayError::ProtocolFamilyNotSupported)));
    }

    #[test]
    fn create_rejects_unsupported_gwtype() {
        let (control, _src, _dst, _delivery) = harness();
        let req = CreateRequest {
            gwtype: 2,
            src_index: 1,
            dst_index: 2,
            ..CreateRequest::default()
        };
        assert!(matches!(control.create(req), Err(GatewayError::InvalidArgument { .. })));
    }

    #[test]
    fn create_rejects_zero_src_or_dst_index() {
        let (control, _src, _dst, _delivery) = harness();
        let zero_src = CreateRequest {
            src_index: 0,
            dst_index: 2,
            ..CreateRequest::default()
        };
        assert!(matches!(control.create(zero_src), Err(GatewayError::InvalidArgument { .. })));

        let zero_dst = CreateRequest {
            src_index: 1,
            dst_index: 0,
            ..CreateRequest::default()
        };
        assert!(matches!(control.create(zero_dst), Err(GatewayError::InvalidArgument { .. })));
    }

    #[test]
    fn create_validates_header_and_indices_before_resolving_devices() {
        // Neither device exists in this registry, but a bad family/gwtype or
        // a zero index must still be rejected before a device lookup runs.
        let (control, _src, _dst, _delivery) = harness();
        let bad_family = CreateRequest {
            family: 0,
            src_index: 7,
            dst_index: 8,
            ..CreateRequest::default()
        };
        assert!(matches!(control.create(bad_family), Err(GatewayError::ProtocolFamilyNotSupported)));

        let zero_index = CreateRequest {
            src_index: 0,
            dst_index: 8,
            ..CreateRequest::default()
        };
        assert!(matches!(control.create(zero_index), Err(GatewayError::InvalidArgument { .. })));
    }

    #[test]
    fn create_rejects_out_of_range_checksum_even_with_empty_program() {
        let (control, _src, _dst, _delivery) = harness();
        let req = CreateRequest {
            src_index: 1,
            dst_index: 2,
            xor_checksum: Some(XorChecksum {
                from_idx: 8,
                to_idx: 0,
                result_idx: 0,
                init_xor: 0,
            }),
            ..CreateRequest::default()
        };
        assert!(control.create(req).is_err());
    }

    #[test]
    fn create_then_inject_forwards_through_to_destination() {
        let (control, _src, dst, delivery) = harness();
        let req = CreateRequest {
            src_index: 1,
            dst_index: 2,
            ..CreateRequest::default()
        };
        let job_id = control.create(req).unwrap();
        assert_eq!(control.job_count(), 1);
        delivery.inject(CanFrame::received(0x100, 8, [1, 2, 3, 4, 5, 6, 7, 8], 0));
        assert_eq!(dst.sent.lock().len(), 1);

        control.delete_by_id(DeleteByIdRequest { job_id }).unwrap();
        assert_eq!(control.job_count(), 0);
        delivery.inject(CanFrame::received(0x100, 8, [0; 8], 0));
        assert_eq!(dst.sent.lock().len(), 1);
    }

    #[test]
    fn delete_with_both_indices_zero_removes_every_job() {
        let (control, _src, dst, delivery) = harness();
        control
            .create(CreateRequest {
                src_index: 1,
                dst_index: 2,
                ..CreateRequest::default()
            })
            .unwrap();
        control
            .create(CreateRequest {
                src_index: 1,
                dst_index: 2,
                filter: Filter::new(0x200, 0x7FF),
                ..CreateRequest::default()
            })
            .unwrap();
        assert_eq!(control.job_count(), 2);

        control.delete(DeleteRequest::default()).unwrap();
        assert_eq!(control.job_count(), 0);
        delivery.inject(CanFrame::received(0x100, 8, [0; 8], 0));
        assert!(dst.sent.lock().is_empty());
    }

    #[test]
    fn delete_by_template_matches_byte_equal_request_and_removes_first_only() {
        let (control, _src, _dst, _delivery) = harness();
        let req = CreateRequest {
            src_index: 1,
            dst_index: 2,
            ..CreateRequest::default()
        };
        control.create(req.clone()).unwrap();
        control.create(req).unwrap();
        assert_eq!(control.job_count(), 2);

        control
            .delete(DeleteRequest {
                src_index: 1,
                dst_index: 2,
                filter: Filter::any(),
                flags: JobFlags::empty(),
                and: ModSlot::inactive(),
                or: ModSlot::inactive(),
                xor: ModSlot::inactive(),
                set: ModSlot::inactive(),
                xor_checksum: None,
                crc8_checksum: None,
            })
            .unwrap();
        assert_eq!(control.job_count(), 1, "only the first match is removed");
    }

    #[test]
    fn delete_by_template_distinguishes_jobs_differing_only_in_checksum_config() {
        let (control, _src, _dst, _delivery) = harness();
        let plain = CreateRequest {
            src_index: 1,
            dst_index: 2,
            ..CreateRequest::default()
        };
        let checksummed = CreateRequest {
            src_index: 1,
            dst_index: 2,
            xor_checksum: Some(XorChecksum {
                from_idx: 0,
                to_idx: 1,
                result_idx: 2,
                init_xor: 0,
            }),
            ..CreateRequest::default()
        };
        control.create(plain).unwrap();
        control.create(checksummed).unwrap();
        assert_eq!(control.job_count(), 2);

        control
            .delete(DeleteRequest {
                src_index: 1,
                dst_index: 2,
                filter: Filter::any(),
                flags: JobFlags::empty(),
                and: ModSlot::inactive(),
                or: ModSlot::inactive(),
                xor: ModSlot::inactive(),
                set: ModSlot::inactive(),
                xor_checksum: Some(XorChecksum {
                    from_idx: 0,
                    to_idx: 1,
                    result_idx: 2,
                    init_xor: 0,
                }),
                crc8_checksum: None,
            })
            .unwrap();
        assert_eq!(control.job_count(), 1, "only the checksum-enabled job matched");

        let remaining = control.dump().entries;
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn delete_by_template_rejects_request_matching_no_job() {
        let (control, _src, _dst, _delivery) = harness();
        control
            .create(CreateRequest {
                src_index: 1,
                dst_index: 2,
                ..CreateRequest::default()
            })
            .unwrap();
        let err = control
            .delete(DeleteRequest {
                src_index: 1,
                dst_index: 2,
                filter: Filter::new(0x42, 0x7FF),
                ..DeleteRequest::default()
            })
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArgument { .. }));
    }

    #[test]
    fn device_unregister_cascades_into_job_removal() {
        let (control, _src, dst, delivery) = harness();
        control
            .create(CreateRequest {
                src_index: 1,
                dst_index: 2,
                ..CreateRequest::default()
            })
            .unwrap();
        control.on_device_unregister(1);
        assert_eq!(control.job_count(), 0);
        delivery.inject(CanFrame::received(0x100, 8, [0; 8], 0));
        assert!(dst.sent.lock().is_empty());
    }

    #[test]
    fn device_unregister_cascades_for_jobs_using_it_as_destination_too() {
        // Scenario 6: three jobs installed, two of them referencing CAN2 —
        // here as the destination, the case `device_unregister_cascades_
        // into_job_removal` above doesn't cover. Unregistering CAN2 must
        // remove both and leave the third (CAN2-free) job standing.
        let (_unused, src, dst, _delivery) = harness();
        let third = Arc::new(TestDevice {
            index: 3,
            sent: Mutex::new(Vec::new()),
        });
        let registry = {
            let mut devices: HashMap<u32, Arc<dyn crate::device::CanDevice>> = HashMap::new();
            devices.insert(1, src.clone());
            devices.insert(2, dst.clone());
            devices.insert(3, third.clone());
            Arc::new(TestRegistry { devices })
        };
        let delivery = Arc::new(TestDelivery::new());
        let control = GatewayControl::new(registry, delivery.clone());

        control
            .create(CreateRequest {
                src_index: 1,
                dst_index: 2,
                ..CreateRequest::default()
            })
            .unwrap();
        control
            .create(CreateRequest {
                src_index: 3,
                dst_index: 2,
                filter: Filter::new(0x200, 0x7FF),
                ..CreateRequest::default()
            })
            .unwrap();
        let surviving = control
            .create(CreateRequest {
                src_index: 1,
                dst_index: 3,
                filter: Filter::new(0x300, 0x7FF),
                ..CreateRequest::default()
            })
            .unwrap();
        assert_eq!(control.job_count(), 3);

        control.on_device_unregister(2);
        assert_eq!(control.job_count(), 1);
        let remaining = control.dump().entries;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].job_id, surviving);
    }

    #[test]
    fn dump_reports_installed_job_with_counters() {
        let (control, _src, _dst, delivery) = harness();
        control
            .create(CreateRequest {
                src_index: 1,
                dst_index: 2,
                ..CreateRequest::default()
            })
            .unwrap();
        delivery.inject(CanFrame::received(0x100, 8, [0; 8], 0));
        let dump = control.dump();
        assert_eq!(dump.entries.len(), 1);
        assert_eq!(dump.entries[0].frame_count, 1);
    }

    #[test]
    fn family_parse_rejects_unknown_families() {
        assert_eq!(Family::parse(29).unwrap(), Family::Can);
        assert!(Family::parse(1).is_err());
    }
}
