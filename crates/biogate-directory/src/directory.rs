use biogate_core::config::EnrollmentConfig;
use biogate_core::{
    DeviceAddr, Error, FingerIndex, FingerprintRecord, FingerprintStatus, Result, TemplateBytes,
    TemplateId, UserId,
};
use biogate_protocol::{CaptureReply, ZkRequest, ensure_ok, parse_attendance};
use biogate_transport::PanelLink;
use self::bytes_read::read_template_ids;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Key of the in-flight enrollment guard.
type EnrollKey = (UserId, u8);

/// Discrepancies between a panel's local store and the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelAudit {
    /// Template ids the panel holds that the directory never issued or has
    /// since revoked.
    pub unknown_on_panel: Vec<TemplateId>,
    /// Active directory records whose template the panel no longer holds.
    pub missing_on_panel: Vec<TemplateId>,
}

impl PanelAudit {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.unknown_on_panel.is_empty() && self.missing_on_panel.is_empty()
    }
}

/// Authoritative store of fingerprint records.
#[derive(Debug)]
pub struct FingerprintDirectory {
    /// All records, each behind its own lock.
    records: RwLock<HashMap<Uuid, Arc<RwLock<FingerprintRecord>>>>,
    /// Hot-path index: (panel, on-device id) to record.
    by_device: RwLock<HashMap<(DeviceAddr, TemplateId), Uuid>>,
    /// Invariant index: at most one active record per (user, finger, panel).
    active: RwLock<HashMap<(UserId, u8, DeviceAddr), Uuid>>,
    /// Enrollments currently running, keyed by (user, finger).
    in_flight: Mutex<HashSet<EnrollKey>>,
    policy: EnrollmentConfig,
    command_timeout: Duration,
}

/// RAII claim on an (user, finger) enrollment slot.
struct EnrollClaim<'a> {
    directory: &'a FingerprintDirectory,
    key: EnrollKey,
}

impl Drop for EnrollClaim<'_> {
    fn drop(&mut self) {
        self.directory
            .in_flight
            .lock()
            .expect("enroll guard lock poisoned")
            .remove(&self.key);
    }
}

impl FingerprintDirectory {
    #[must_use]
    pub fn new(policy: EnrollmentConfig, command_timeout: Duration) -> Self {
        FingerprintDirectory {
            records: RwLock::new(HashMap::new()),
            by_device: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            policy,
            command_timeout,
        }
    }

    /// Enroll a fingerprint: capture on the panel, gate on quality, then
    /// persist and index the record.
    ///
    /// The panel may need several scans; up to the configured number of
    /// captures are requested and the first one meeting the quality
    /// threshold wins. On failure the panel-side partial capture is
    /// cancelled, so no orphan ends up on either side.
    ///
    /// # Errors
    /// - `DuplicateFinger` when an active record already exists for this
    ///   (user, finger) on this panel, or another enrollment for the same
    ///   pair is in flight.
    /// - `QualityTooLow` when no capture reached the threshold.
    /// - `DeviceUnreachable` / `Timeout` from the panel conversation.
    pub async fn enroll<L: PanelLink>(
        &self,
        link: &L,
        user_id: UserId,
        finger_index: FingerIndex,
    ) -> Result<FingerprintRecord> {
        let device = link.addr();
        let _claim = self.claim_enrollment(user_id, finger_index)?;

        if self
            .active
            .read()
            .expect("active index lock poisoned")
            .contains_key(&(user_id, finger_index.as_u8(), device))
        {
            return Err(Error::DuplicateFinger {
                user_id: user_id.as_u64(),
                finger_index: finger_index.as_u8(),
            });
        }

        let begin = ZkRequest::EnrollBegin {
            user_id: user_id.as_u64() as u32,
            finger_index: finger_index.as_u8(),
        };
        ensure_ok(&link.request(begin, self.command_timeout).await?)?;

        let capture = match self.capture_with_retries(link).await {
            Ok(capture) => capture,
            Err(e) => {
                // Discard the partial capture; best effort, the panel drops
                // it on session reset anyway.
                let _ = link
                    .request(ZkRequest::EnrollCancel, self.command_timeout)
                    .await;
                return Err(e);
            }
        };

        let record = FingerprintRecord {
            id: Uuid::new_v4(),
            user_id,
            finger_index,
            device,
            template: TemplateBytes::new(capture.template),
            template_id: TemplateId::new(capture.template_id),
            quality: capture.quality,
            status: FingerprintStatus::Active,
            enrolled_at: Utc::now(),
            last_used: None,
            expires_at: None,
        };
        self.insert(record.clone());
        info!(
            user_id = %user_id,
            device = %device,
            template_id = %record.template_id,
            quality = record.quality,
            "Fingerprint enrolled"
        );
        Ok(record)
    }

    async fn capture_with_retries<L: PanelLink>(&self, link: &L) -> Result<CaptureReply> {
        let mut best_quality = 0u8;
        for attempt in 1..=self.policy.capture_attempts {
            let reply = link
                .request(ZkRequest::EnrollCapture, self.command_timeout)
                .await?;
            let capture = CaptureReply::parse(&reply)?;
            if capture.quality >= self.policy.quality_threshold {
                return Ok(capture);
            }
            best_quality = best_quality.max(capture.quality);
            debug!(
                attempt,
                quality = capture.quality,
                threshold = self.policy.quality_threshold,
                "Capture below quality threshold"
            );
        }
        Err(Error::QualityTooLow {
            quality: best_quality,
            threshold: self.policy.quality_threshold,
        })
    }

    fn claim_enrollment(&self, user_id: UserId, finger_index: FingerIndex) -> Result<EnrollClaim> {
        let key = (user_id, finger_index.as_u8());
        let mut in_flight = self.in_flight.lock().expect("enroll guard lock poisoned");
        if !in_flight.insert(key) {
            return Err(Error::DuplicateFinger {
                user_id: user_id.as_u64(),
                finger_index: finger_index.as_u8(),
            });
        }
        Ok(EnrollClaim {
            directory: self,
            key,
        })
    }

    /// Insert a record and index it. Also used by tests to seed state.
    pub fn insert(&self, record: FingerprintRecord) {
        let id = record.id;
        let device_key = (record.device, record.template_id);
        let identity_key = (record.user_id, record.finger_index.as_u8(), record.device);
        let is_active = record.status == FingerprintStatus::Active;

        // Record before index, one lock at a time: lookups go index first,
        // so an indexed id always points at an existing record.
        self.records
            .write()
            .expect("records lock poisoned")
            .insert(id, Arc::new(RwLock::new(record)));
        self.by_device
            .write()
            .expect("device index lock poisoned")
            .insert(device_key, id);

        if is_active {
            self.active
                .write()
                .expect("active index lock poisoned")
                .insert(identity_key, id);
        }
    }

    /// Hot-path identity lookup, scoped to the emitting panel.
    ///
    /// # Errors
    /// `UnknownTemplate` when the panel/template pair is not indexed.
    pub fn resolve(&self, device: DeviceAddr, template_id: TemplateId) -> Result<UserId> {
        self.lookup(device, template_id).map(|record| record.user_id)
    }

    /// Like [`resolve`](Self::resolve) but returns the full record
    /// snapshot, which the decision engine needs to check usability.
    ///
    /// # Errors
    /// `UnknownTemplate` when the panel/template pair is not indexed.
    pub fn lookup(&self, device: DeviceAddr, template_id: TemplateId) -> Result<FingerprintRecord> {
        let record = {
            let by_device = self.by_device.read().expect("device index lock poisoned");
            let id = by_device
                .get(&(device, template_id))
                .ok_or_else(|| Error::UnknownTemplate {
                    device: device.to_string(),
                    template_id: template_id.as_u32(),
                })?;
            let records = self.records.read().expect("records lock poisoned");
            Arc::clone(records.get(id).expect("index points at missing record"))
        };
        let snapshot = record.read().expect("record lock poisoned").clone();
        Ok(snapshot)
    }

    /// Directory-level deactivation. The on-device template stays; use
    /// [`revoke`](Self::revoke) to delete it from the panel too.
    ///
    /// # Errors
    /// `RecordNotFound` for unknown ids.
    pub fn deactivate(&self, id: Uuid) -> Result<()> {
        let record = self.record_arc(id)?;
        let identity_key = {
            let mut record = record.write().expect("record lock poisoned");
            record.status = FingerprintStatus::Inactive;
            (record.user_id, record.finger_index.as_u8(), record.device)
        };
        self.active
            .write()
            .expect("active index lock poisoned")
            .remove(&identity_key);
        info!(record_id = %id, "Fingerprint deactivated");
        Ok(())
    }

    /// Revoke a record: delete from the panel store, then mark expired.
    ///
    /// The record is deactivated before the panel call, so a failure on the
    /// panel side leaves it `Inactive` and the whole operation safely
    /// retryable. Only after the panel confirms does the record become
    /// `Expired`.
    ///
    /// # Errors
    /// `RecordNotFound` for unknown ids, `Config` when the link does not
    /// point at the panel holding the template, and transport errors from
    /// the delete command.
    pub async fn revoke<L: PanelLink>(&self, link: &L, id: Uuid) -> Result<()> {
        let record = self.record_arc(id)?;
        let (user_id, finger_index, device) = {
            let record = record.read().expect("record lock poisoned");
            (record.user_id, record.finger_index, record.device)
        };
        if link.addr() != device {
            return Err(Error::Config(format!(
                "Record {id} belongs to panel {device}, not {}",
                link.addr()
            )));
        }

        self.deactivate(id)?;

        let delete = ZkRequest::DeleteTemplate {
            user_id: user_id.as_u64() as u32,
            finger_index: finger_index.as_u8(),
        };
        ensure_ok(&link.request(delete, self.command_timeout).await?)?;

        record.write().expect("record lock poisoned").status = FingerprintStatus::Expired;
        info!(record_id = %id, device = %device, "Fingerprint revoked");
        Ok(())
    }

    /// Stamp a successful use of this record.
    pub fn touch_last_used(&self, id: Uuid, when: DateTime<Utc>) {
        if let Ok(record) = self.record_arc(id) {
            record.write().expect("record lock poisoned").last_used = Some(when);
        }
    }

    /// All records for a user, any status.
    #[must_use]
    pub fn records_for_user(&self, user_id: UserId) -> Vec<FingerprintRecord> {
        let records = self.records.read().expect("records lock poisoned");
        let mut result: Vec<FingerprintRecord> = records
            .values()
            .map(|record| record.read().expect("record lock poisoned").clone())
            .filter(|record| record.user_id == user_id)
            .collect();
        result.sort_by_key(|record| record.enrolled_at);
        result
    }

    /// Compare a panel's local template store with the directory.
    ///
    /// # Errors
    /// Transport errors from the template listing command.
    pub async fn audit_panel<L: PanelLink>(&self, link: &L) -> Result<PanelAudit> {
        let device = link.addr();
        let reply = link
            .request(ZkRequest::GetTemplates, self.command_timeout)
            .await?;
        ensure_ok(&reply)?;
        let on_panel: HashSet<TemplateId> = read_template_ids(&reply.payload)?
            .into_iter()
            .map(TemplateId::new)
            .collect();

        let expected: HashSet<TemplateId> = {
            let by_device = self.by_device.read().expect("device index lock poisoned");
            let records = self.records.read().expect("records lock poisoned");
            by_device
                .iter()
                .filter(|((addr, _), _)| *addr == device)
                .filter(|(_, id)| {
                    records
                        .get(*id)
                        .map(|record| {
                            record.read().expect("record lock poisoned").status
                                == FingerprintStatus::Active
                        })
                        .unwrap_or(false)
                })
                .map(|((_, template_id), _)| *template_id)
                .collect()
        };

        let audit = PanelAudit {
            unknown_on_panel: on_panel.difference(&expected).copied().collect(),
            missing_on_panel: expected.difference(&on_panel).copied().collect(),
        };
        if !audit.is_consistent() {
            warn!(
                device = %device,
                unknown = audit.unknown_on_panel.len(),
                missing = audit.missing_on_panel.len(),
                "Panel store drifted from directory"
            );
        }
        Ok(audit)
    }

    /// Import panel-recorded attendance, returning `(user_id, timestamp)`
    /// pairs for the coordinator to turn into events.
    ///
    /// # Errors
    /// Transport errors from the attendance command.
    pub async fn fetch_attendance<L: PanelLink>(
        &self,
        link: &L,
        limit: u32,
    ) -> Result<Vec<(UserId, DateTime<Utc>)>> {
        let reply = link
            .request(ZkRequest::GetAttendance { limit }, self.command_timeout)
            .await?;
        let records = parse_attendance(&reply)?;
        Ok(records
            .into_iter()
            .take(limit as usize)
            .map(|entry| (UserId::new(u64::from(entry.user_id)), entry.timestamp))
            .collect())
    }

    fn record_arc(&self, id: Uuid) -> Result<Arc<RwLock<FingerprintRecord>>> {
        let records = self.records.read().expect("records lock poisoned");
        records
            .get(&id)
            .map(Arc::clone)
            .ok_or_else(|| Error::RecordNotFound { id: id.to_string() })
    }
}

/// Payload helpers local to this crate.
mod bytes_read {
    use biogate_core::{Error, Result};

    /// Parse a `GetTemplates` payload: `[count: u32][id: u32]...`.
    pub fn read_template_ids(payload: &[u8]) -> Result<Vec<u32>> {
        if payload.len() < 4 {
            return Err(Error::protocol("Template list missing count"));
        }
        let count = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        let body = &payload[4..];
        if body.len() != count * 4 {
            return Err(Error::protocol(format!(
                "Template list size {} does not match count {count}",
                body.len()
            )));
        }
        Ok(body
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biogate_core::constants::DEFAULT_QUALITY_THRESHOLD;
    use biogate_transport::mock::MockPanelLink;

    fn panel_addr() -> DeviceAddr {
        "192.168.0.50:4370".parse().unwrap()
    }

    fn other_panel() -> DeviceAddr {
        "192.168.0.51:4370".parse().unwrap()
    }

    fn directory() -> FingerprintDirectory {
        FingerprintDirectory::new(EnrollmentConfig::default(), Duration::from_secs(1))
    }

    fn user(id: u64) -> UserId {
        UserId::new(id)
    }

    fn finger(index: u8) -> FingerIndex {
        FingerIndex::new(index).unwrap()
    }

    #[tokio::test]
    async fn test_enroll_happy_path() {
        let directory = directory();
        let link = MockPanelLink::new(panel_addr());
        link.queue_ok(vec![]); // EnrollBegin
        link.queue_capture(17, 82, &[1, 2, 3, 4]);

        let record = directory
            .enroll(&link, user(7), finger(0))
            .await
            .unwrap();
        assert_eq!(record.template_id, TemplateId::new(17));
        assert_eq!(record.quality, 82);
        assert_eq!(record.status, FingerprintStatus::Active);

        assert_eq!(
            directory.resolve(panel_addr(), TemplateId::new(17)).unwrap(),
            user(7)
        );
    }

    #[tokio::test]
    async fn test_enroll_retries_low_quality_captures() {
        let directory = directory();
        let link = MockPanelLink::new(panel_addr());
        link.queue_ok(vec![]); // EnrollBegin
        link.queue_capture(17, 20, &[1]);
        link.queue_capture(17, 30, &[2]);
        link.queue_capture(17, DEFAULT_QUALITY_THRESHOLD, &[3]);

        let record = directory.enroll(&link, user(7), finger(0)).await.unwrap();
        assert_eq!(record.quality, DEFAULT_QUALITY_THRESHOLD);
        // Begin + three captures
        assert_eq!(link.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_enroll_quality_exhaustion_cancels() {
        let directory = directory();
        let link = MockPanelLink::new(panel_addr());
        link.queue_ok(vec![]); // EnrollBegin
        link.queue_capture(17, 10, &[1]);
        link.queue_capture(17, 40, &[2]);
        link.queue_capture(17, 30, &[3]);
        link.queue_ok(vec![]); // EnrollCancel

        let result = directory.enroll(&link, user(7), finger(0)).await;
        assert!(matches!(
            result,
            Err(Error::QualityTooLow {
                quality: 40,
                threshold: DEFAULT_QUALITY_THRESHOLD
            })
        ));

        // Cancel was sent, and no record was persisted
        assert!(matches!(
            link.requests().last(),
            Some(ZkRequest::EnrollCancel)
        ));
        assert!(directory.records_for_user(user(7)).is_empty());
    }

    #[tokio::test]
    async fn test_enroll_duplicate_active_record() {
        let directory = directory();
        let link = MockPanelLink::new(panel_addr());
        link.queue_ok(vec![]);
        link.queue_capture(17, 90, &[1]);
        directory.enroll(&link, user(7), finger(0)).await.unwrap();

        let result = directory.enroll(&link, user(7), finger(0)).await;
        assert!(matches!(result, Err(Error::DuplicateFinger { .. })));
    }

    #[tokio::test]
    async fn test_enroll_device_unreachable_leaves_no_orphan() {
        let directory = directory();
        let link = MockPanelLink::new(panel_addr());
        // EnrollBegin fails outright
        let result = directory.enroll(&link, user(7), finger(0)).await;
        assert!(matches!(result, Err(Error::DeviceUnreachable { .. })));
        assert!(directory.records_for_user(user(7)).is_empty());

        // The slot is free again for a retry
        link.queue_ok(vec![]);
        link.queue_capture(17, 90, &[1]);
        assert!(directory.enroll(&link, user(7), finger(0)).await.is_ok());
    }

    #[test]
    fn test_resolve_is_device_scoped() {
        let directory = directory();
        let template = TemplateId::new(5);
        let mut record_a = sample_record(user(1), panel_addr(), template);
        record_a.id = Uuid::new_v4();
        directory.insert(record_a);
        let mut record_b = sample_record(user(2), other_panel(), template);
        record_b.id = Uuid::new_v4();
        directory.insert(record_b);

        // Same on-device id on two panels resolves to different users
        assert_eq!(directory.resolve(panel_addr(), template).unwrap(), user(1));
        assert_eq!(directory.resolve(other_panel(), template).unwrap(), user(2));
    }

    #[test]
    fn test_resolve_unknown_template() {
        let directory = directory();
        let result = directory.resolve(panel_addr(), TemplateId::new(9999));
        assert!(matches!(result, Err(Error::UnknownTemplate { .. })));
    }

    #[tokio::test]
    async fn test_revoke_panel_failure_stays_inactive() {
        let directory = directory();
        let link = MockPanelLink::new(panel_addr());
        link.queue_ok(vec![]);
        link.queue_capture(17, 90, &[1]);
        let record = directory.enroll(&link, user(7), finger(0)).await.unwrap();

        link.queue_panel_error(); // DeleteTemplate fails
        let result = directory.revoke(&link, record.id).await;
        assert!(result.is_err());
        let snapshot = directory.lookup(panel_addr(), record.template_id).unwrap();
        assert_eq!(snapshot.status, FingerprintStatus::Inactive);

        // Retry succeeds and closes the record
        link.queue_ok(vec![]);
        directory.revoke(&link, record.id).await.unwrap();
        let snapshot = directory.lookup(panel_addr(), record.template_id).unwrap();
        assert_eq!(snapshot.status, FingerprintStatus::Expired);
    }

    #[tokio::test]
    async fn test_revoke_wrong_panel_rejected() {
        let directory = directory();
        let link = MockPanelLink::new(panel_addr());
        link.queue_ok(vec![]);
        link.queue_capture(17, 90, &[1]);
        let record = directory.enroll(&link, user(7), finger(0)).await.unwrap();

        let wrong_link = MockPanelLink::new(other_panel());
        let result = directory.revoke(&wrong_link, record.id).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_audit_panel_reports_drift() {
        let directory = directory();
        let link = MockPanelLink::new(panel_addr());
        link.queue_ok(vec![]);
        link.queue_capture(17, 90, &[1]);
        directory.enroll(&link, user(7), finger(0)).await.unwrap();

        // Panel claims 17 and a stray 99
        let mut payload = Vec::new();
        payload.extend_from_slice(&2u32.to_le_bytes());
        payload.extend_from_slice(&17u32.to_le_bytes());
        payload.extend_from_slice(&99u32.to_le_bytes());
        link.queue_ok(payload);

        let audit = directory.audit_panel(&link).await.unwrap();
        assert_eq!(audit.unknown_on_panel, vec![TemplateId::new(99)]);
        assert!(audit.missing_on_panel.is_empty());
    }

    #[test]
    fn test_touch_last_used() {
        let directory = directory();
        let record = sample_record(user(1), panel_addr(), TemplateId::new(5));
        let id = record.id;
        directory.insert(record);

        let when = Utc::now();
        directory.touch_last_used(id, when);
        let snapshot = directory.lookup(panel_addr(), TemplateId::new(5)).unwrap();
        assert_eq!(snapshot.last_used, Some(when));
    }

    fn sample_record(
        user_id: UserId,
        device: DeviceAddr,
        template_id: TemplateId,
    ) -> FingerprintRecord {
        FingerprintRecord {
            id: Uuid::new_v4(),
            user_id,
            finger_index: finger(0),
            device,
            template: TemplateBytes::new(vec![0u8; 32]),
            template_id,
            quality: 80,
            status: FingerprintStatus::Active,
            enrolled_at: Utc::now(),
            last_used: None,
            expires_at: None,
        }
    }
}
