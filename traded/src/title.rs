//! Per-title capabilities the session engine is generic over.
//!
//! A title knows where things live in device memory and how to read the UI
//! flags. [`LayoutTitle`] implements it from a [`TitleSection`] pointer
//! catalog, which covers titles that differ only in offsets and flag values.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use trade_common::config::TitleSection;
use trade_common::payload::fingerprint_of;
use trade_common::types::STATUS_SIZE;
use trade_common::{DeviceError, DeviceFacade, Fingerprint, PartnerInfo, Payload, SLOT_SIZE};

/// Device addresses cached for one login.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOffsets {
    pub box_start: u64,
    pub overworld: u64,
    pub portal: u64,
    pub connected: u64,
    pub partner_nid: u64,
    pub partner_offered: u64,
    pub trader1: u64,
    pub trader2: u64,
    pub my_status: u64,
    pub current_box: u64,
}

#[async_trait]
pub trait Title: Send + Sync {
    fn device(&self) -> &dyn DeviceFacade;

    fn game_title_id(&self) -> u64;

    fn news_applet_id(&self) -> u64;

    async fn resolve_offsets(&self) -> Result<SessionOffsets, DeviceError>;

    /// The partner offer moves between trades; re-resolve before reading it.
    async fn resolve_partner_offered(&self) -> Result<u64, DeviceError>;

    async fn is_on_overworld(&self, offsets: &SessionOffsets) -> Result<bool, DeviceError>;

    async fn is_online(&self, offsets: &SessionOffsets) -> Result<bool, DeviceError>;

    /// In the trade portal or any of its sub-menus, but not the box.
    async fn is_in_portal(&self, offsets: &SessionOffsets) -> Result<bool, DeviceError>;

    async fn is_in_box(&self, offsets: &SessionOffsets) -> Result<bool, DeviceError>;

    async fn read_payload(&self, offset: u64) -> Result<Payload, DeviceError>;

    async fn write_payload(&self, offset: u64, payload: &Payload) -> Result<(), DeviceError>;

    async fn read_fingerprint(&self, offset: u64) -> Result<Fingerprint, DeviceError>;

    async fn read_partner_nid(&self, offsets: &SessionOffsets) -> Result<u64, DeviceError>;

    async fn clear_partner_nid(&self, offsets: &SessionOffsets) -> Result<(), DeviceError>;

    /// Trainer of the console itself.
    async fn read_host(&self, offsets: &SessionOffsets) -> Result<PartnerInfo, DeviceError>;

    /// Trainer on the other side, told apart from `host` by identity.
    async fn read_partner(
        &self,
        offsets: &SessionOffsets,
        host: &PartnerInfo,
    ) -> Result<PartnerInfo, DeviceError>;

    async fn set_current_box(&self, offsets: &SessionOffsets, index: u8) -> Result<(), DeviceError>;
}

/// Title described entirely by a pointer catalog and flag values.
#[derive(Clone)]
pub struct LayoutTitle {
    device: Arc<dyn DeviceFacade>,
    profile: TitleSection,
}

impl LayoutTitle {
    pub fn new(device: Arc<dyn DeviceFacade>, profile: TitleSection) -> Self {
        Self { device, profile }
    }

    async fn resolve(&self, name: &str) -> Result<u64, DeviceError> {
        let path = self
            .profile
            .pointers
            .get(name)
            .ok_or_else(|| DeviceError::PointerUnresolved(name.to_string()))?;
        self.device.resolve_pointer_chain(path).await
    }

    async fn read_flag(&self, offset: u64) -> Result<u8, DeviceError> {
        let bytes = self.device.read_bytes(offset, 1).await?;
        Ok(bytes.first().copied().unwrap_or_default())
    }
}

#[async_trait]
impl Title for LayoutTitle {
    fn device(&self) -> &dyn DeviceFacade {
        self.device.as_ref()
    }

    fn game_title_id(&self) -> u64 {
        self.profile.game_title_id
    }

    fn news_applet_id(&self) -> u64 {
        self.profile.news_applet_id
    }

    async fn resolve_offsets(&self) -> Result<SessionOffsets, DeviceError> {
        let offsets = SessionOffsets {
            box_start: self.resolve("box_start").await?,
            overworld: self.resolve("overworld").await?,
            portal: self.resolve("portal_box_status").await?,
            connected: self.resolve("is_connected").await?,
            partner_nid: self.resolve("partner_nid").await?,
            partner_offered: self.resolve("partner_offered").await?,
            trader1: self.resolve("trader1_my_status").await?,
            trader2: self.resolve("trader2_my_status").await?,
            my_status: self.resolve("my_status").await?,
            current_box: self.resolve("current_box").await?,
        };
        debug!(?offsets, "Resolved session offsets");
        Ok(offsets)
    }

    async fn resolve_partner_offered(&self) -> Result<u64, DeviceError> {
        self.resolve("partner_offered").await
    }

    async fn is_on_overworld(&self, offsets: &SessionOffsets) -> Result<bool, DeviceError> {
        Ok(self.read_flag(offsets.overworld).await? == self.profile.overworld_value)
    }

    async fn is_online(&self, offsets: &SessionOffsets) -> Result<bool, DeviceError> {
        Ok(self.read_flag(offsets.connected).await? == self.profile.connected_value)
    }

    async fn is_in_portal(&self, offsets: &SessionOffsets) -> Result<bool, DeviceError> {
        Ok(self.read_flag(offsets.portal).await? == self.profile.portal_value)
    }

    async fn is_in_box(&self, offsets: &SessionOffsets) -> Result<bool, DeviceError> {
        Ok(self.read_flag(offsets.portal).await? == self.profile.box_value)
    }

    async fn read_payload(&self, offset: u64) -> Result<Payload, DeviceError> {
        let bytes = self.device.read_bytes(offset, SLOT_SIZE).await?;
        Ok(Payload::decode(&bytes))
    }

    async fn write_payload(&self, offset: u64, payload: &Payload) -> Result<(), DeviceError> {
        self.device.write_bytes(offset, &payload.encode()).await
    }

    async fn read_fingerprint(&self, offset: u64) -> Result<Fingerprint, DeviceError> {
        let bytes = self.device.read_bytes(offset, 8).await?;
        Ok(fingerprint_of(&bytes))
    }

    async fn read_partner_nid(&self, offsets: &SessionOffsets) -> Result<u64, DeviceError> {
        let bytes = self.device.read_bytes(offsets.partner_nid, 8).await?;
        let mut raw = [0u8; 8];
        let len = bytes.len().min(8);
        raw[..len].copy_from_slice(&bytes[..len]);
        Ok(u64::from_le_bytes(raw))
    }

    async fn clear_partner_nid(&self, offsets: &SessionOffsets) -> Result<(), DeviceError> {
        self.device.write_bytes(offsets.partner_nid, &[0u8; 8]).await
    }

    async fn read_host(&self, offsets: &SessionOffsets) -> Result<PartnerInfo, DeviceError> {
        let bytes = self.device.read_bytes(offsets.my_status, STATUS_SIZE).await?;
        Ok(PartnerInfo::from_status(0, &bytes))
    }

    async fn read_partner(
        &self,
        offsets: &SessionOffsets,
        host: &PartnerInfo,
    ) -> Result<PartnerInfo, DeviceError> {
        let nid = self.read_partner_nid(offsets).await?;
        let first = self.device.read_bytes(offsets.trader1, STATUS_SIZE).await?;
        let first = PartnerInfo::from_status(nid, &first);
        if !first.same_trainer(host) {
            return Ok(first);
        }
        let second = self.device.read_bytes(offsets.trader2, STATUS_SIZE).await?;
        Ok(PartnerInfo::from_status(nid, &second))
    }

    async fn set_current_box(&self, offsets: &SessionOffsets, index: u8) -> Result<(), DeviceError> {
        self.device.write_bytes(offsets.current_box, &[index]).await
    }
}
