//! Management API route handlers.
//!
//! Request bodies mirror `cangw_core::control` types closely enough that a
//! handler is mostly field-by-field conversion; the conversions live here
//! rather than on the core types so `cangw-core` stays free of a JSON
//! dependency on its public API surface.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use cangw_core::checksum::{Crc8Checksum, Crc8Profile, XorChecksum};
use cangw_core::control::{CreateRequest, DeleteByIdRequest};
use cangw_core::filter::Filter;
use cangw_core::frame::CanFrame;
use cangw_core::job::JobFlags;
use cangw_core::modify::{FieldMask, ModSlot};

use super::AppState;

#[derive(Deserialize, Default)]
pub struct FilterBody {
    #[serde(default)]
    can_id: u32,
    #[serde(default)]
    can_mask: u32,
}

#[derive(Deserialize, Default)]
pub struct FlagsBody {
    #[serde(default)]
    src_tstamp: bool,
    #[serde(default)]
    echo: bool,
}

#[derive(Deserialize, Default)]
pub struct ModSlotBody {
    #[serde(default)]
    id: bool,
    #[serde(default)]
    dlc: bool,
    #[serde(default)]
    data: bool,
    #[serde(default)]
    template_id: u32,
    #[serde(default)]
    template_dlc: u8,
    #[serde(default)]
    template_data: [u8; 8],
}

impl From<ModSlotBody> for ModSlot {
    fn from(b: ModSlotBody) -> Self {
        let mut bits = 0u8;
        if b.id {
            bits |= FieldMask::ID;
        }
        if b.dlc {
            bits |= FieldMask::DLC;
        }
        if b.data {
            bits |= FieldMask::DATA;
        }
        ModSlot::new(
            FieldMask::new(bits),
            CanFrame::template(b.template_id, b.template_dlc, b.template_data),
        )
    }
}

#[derive(Deserialize)]
pub struct XorChecksumBody {
    from_idx: i8,
    to_idx: i8,
    result_idx: i8,
    #[serde(default)]
    init_xor: u8,
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Crc8ProfileBody {
    Unspec,
    XorValue { value: u8 },
    XorDlc,
}

impl From<Crc8ProfileBody> for Crc8Profile {
    fn from(b: Crc8ProfileBody) -> Self {
        match b {
            Crc8ProfileBody::Unspec => Crc8Profile::Unspec,
            Crc8ProfileBody::XorValue { value } => Crc8Profile::XorValue(value),
            Crc8ProfileBody::XorDlc => Crc8Profile::XorDlc,
        }
    }
}

#[derive(Deserialize)]
pub struct Crc8ChecksumBody {
    from_idx: i8,
    to_idx: i8,
    result_idx: i8,
    profile: Crc8ProfileBody,
    #[serde(default)]
    init_crc: u8,
}

fn default_family() -> u16 {
    cangw_core::control::FAMILY_CAN
}

fn default_gwtype() -> u8 {
    cangw_core::job::GWTYPE_CAN_CAN
}

#[derive(Deserialize)]
pub struct CreateJobBody {
    #[serde(default = "default_family")]
    family: u16,
    #[serde(default = "default_gwtype")]
    gwtype: u8,
    src_index: u32,
    dst_index: u32,
    #[serde(default)]
    filter: FilterBody,
    #[serde(default)]
    flags: FlagsBody,
    #[serde(default)]
    and: ModSlotBody,
    #[serde(default)]
    or: ModSlotBody,
    #[serde(default)]
    xor: ModSlotBody,
    #[serde(default)]
    set: ModSlotBody,
    xor_checksum: Option<XorChecksumBody>,
    crc8_checksum: Option<Crc8ChecksumBody>,
}

fn job_flags(body: &FlagsBody) -> JobFlags {
    let mut flags = JobFlags::empty();
    if body.src_tstamp {
        flags |= JobFlags::SRC_TSTAMP;
    }
    if body.echo {
        flags |= JobFlags::ECHO;
    }
    flags
}

/// POST /jobs — install a new routing rule.
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateJobBody>,
) -> impl IntoResponse {
    let req = CreateRequest {
        family: body.family,
        gwtype: body.gwtype,
        src_index: body.src_index,
        dst_index: body.dst_index,
        filter: Filter::new(body.filter.can_id, body.filter.can_mask),
        flags: job_flags(&body.flags),
        and: body.and.into(),
        or: body.or.into(),
        xor: body.xor.into(),
        set: body.set.into(),
        xor_checksum: body.xor_checksum.map(|c| XorChecksum {
            from_idx: c.from_idx,
            to_idx: c.to_idx,
            result_idx: c.result_idx,
            init_xor: c.init_xor,
        }),
        crc8_checksum: body.crc8_checksum.map(|c| Crc8Checksum {
            from_idx: c.from_idx,
            to_idx: c.to_idx,
            result_idx: c.result_idx,
            profile: c.profile.into(),
            init_crc: c.init_crc,
            table: cangw_core::checksum::build_sae_j1850_table(),
        }),
    };

    match state.control.create(req) {
        Ok(job_id) => (StatusCode::CREATED, Json(json!({ "job_id": job_id }))).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

/// GET /jobs — dump every installed rule with its forward/drop counters.
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.control.dump())
}

/// DELETE /jobs/:id — remove a rule by id.
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    match state.control.delete_by_id(DeleteByIdRequest { job_id: id }) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

/// DELETE /jobs — remove every installed rule. Mirrors the control-plane
/// wire contract's "both indices zero" delete-all case.
pub async fn delete_all_jobs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let _ = state.control.delete(cangw_core::control::DeleteRequest::default());
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
pub struct InjectBody {
    device_index: u32,
    can_id: u32,
    dlc: u8,
    data: [u8; 8],
}

/// POST /inject — feed a frame onto a simulated device's receive side, as
/// if it had just arrived off the wire.
pub async fn inject_frame(
    State(state): State<Arc<AppState>>,
    Json(body): Json<InjectBody>,
) -> impl IntoResponse {
    let frame = CanFrame::received(body.can_id, body.dlc, body.data, 0);
    state.bus.inject(body.device_index, frame);
    StatusCode::ACCEPTED
}
