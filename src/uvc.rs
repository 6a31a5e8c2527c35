//! UVC control transport for a capture node.
//!
//! Vendor-specific controls live in an extension unit (XU) addressed by unit
//! id and control selector. The payload must be exactly the control's
//! declared size; the driver rejects anything else. Standard image controls
//! (brightness, exposure, ...) sit on the processing unit and go through the
//! generic V4L2 control ioctls instead.

use std::io;

use crate::error::UvcError;
use crate::protocol::*;
use crate::subdevice::Subdevice;

/// Extension-unit and processing-unit control methods.
///
/// All of these issue a kernel query immediately; none require the subdevice
/// to be capturing.
impl Subdevice {
    // --- Extension unit ---

    /// `GET_CUR` on extension-unit control `control`, filling `data`.
    pub fn get_control(&self, control: u8, data: &mut [u8]) -> Result<(), UvcError> {
        self.node()
            .xu_query(self.extension_unit(), control, UVC_GET_CUR, data)
            .map_err(|e| self.control_error(u32::from(control), e))
    }

    /// `SET_CUR` on extension-unit control `control` with `data`.
    pub fn set_control(&self, control: u8, data: &[u8]) -> Result<(), UvcError> {
        // The query struct carries a mutable pointer even for SET_CUR.
        let mut payload = data.to_vec();
        self.node()
            .xu_query(self.extension_unit(), control, UVC_SET_CUR, &mut payload)
            .map_err(|e| self.control_error(u32::from(control), e))
    }

    // --- Processing unit ---

    /// Read standard control `id` (a `V4L2_CID_*` value).
    pub fn get_pu_control(&self, id: u32) -> Result<i32, UvcError> {
        self.node().get_control(id).map_err(|e| self.control_error(id, e))
    }

    /// Write standard control `id` (a `V4L2_CID_*` value).
    pub fn set_pu_control(&self, id: u32, value: i32) -> Result<(), UvcError> {
        self.node()
            .set_control(id, value)
            .map_err(|e| self.control_error(id, e))
    }

    fn control_error(&self, control: u32, source: io::Error) -> UvcError {
        UvcError::ControlQuery {
            path: self.path().to_owned(),
            control,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::BackendConfig;
    use crate::error::UvcError;
    use crate::mock::{mock_node, test_identity};
    use crate::subdevice::Subdevice;

    fn subdevice(config: &BackendConfig) -> (Subdevice, crate::mock::MockHandle) {
        let (node, handle) = mock_node();
        let sub = Subdevice::from_node(test_identity(0x8086, 0x0a80, 0), Box::new(node), config).unwrap();
        (sub, handle)
    }

    #[test]
    fn xu_set_then_get_round_trips_through_default_unit() {
        let (sub, handle) = subdevice(&BackendConfig::default());
        sub.set_control(5, &[0x01, 0x02, 0x03, 0x04]).unwrap();

        let mut data = [0u8; 4];
        sub.get_control(5, &mut data).unwrap();
        assert_eq!(data, [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(handle.state().last_unit, Some(2));
    }

    #[test]
    fn xu_queries_use_configured_unit() {
        let (sub, handle) = subdevice(&BackendConfig::default().with_extension_unit(6));
        sub.set_control(1, &[0]).unwrap();
        assert_eq!(handle.state().last_unit, Some(6));
    }

    #[test]
    fn wrong_payload_size_surfaces_os_error() {
        let (sub, _handle) = subdevice(&BackendConfig::default());
        sub.set_control(5, &[0; 4]).unwrap();

        let mut short = [0u8; 2];
        let err = sub.get_control(5, &mut short).unwrap_err();
        assert!(matches!(err, UvcError::ControlQuery { control: 5, .. }));
        assert_eq!(err.os_error(), Some(libc::EINVAL));
    }

    #[test]
    fn unknown_xu_control_fails() {
        let (sub, _handle) = subdevice(&BackendConfig::default());
        let mut data = [0u8; 1];
        assert!(sub.get_control(0x7f, &mut data).is_err());
    }

    #[test]
    fn processing_unit_controls() {
        let (sub, handle) = subdevice(&BackendConfig::default());
        handle.state().pu_controls.insert(0x0098_0900, 32);

        assert_eq!(sub.get_pu_control(0x0098_0900).unwrap(), 32);
        sub.set_pu_control(0x0098_0900, 64).unwrap();
        assert_eq!(sub.get_pu_control(0x0098_0900).unwrap(), 64);

        let err = sub.get_pu_control(0x0098_0999).unwrap_err();
        assert!(matches!(err, UvcError::ControlQuery { control: 0x0098_0999, .. }));
    }
}
