//! emsflash-usb - USB transport for the EMS 64 Mbit flash cart
//!
//! The cartridge programmer speaks a small bulk protocol: every exchange
//! starts with a 9-byte command frame (command byte, big-endian address,
//! big-endian length). Reads send the frame on the OUT endpoint and
//! collect the payload from the IN endpoint; writes append the payload to
//! the frame in a single OUT transfer. The device requires write payloads
//! in multiples of 32 bytes.
//!
//! Only the flash ROM commands are known; the SRAM side of the protocol
//! is undocumented, so SRAM transfers are reported as unsupported.

mod error;

pub use error::{Result, UsbCartError};

use std::time::Duration;

use nusb::transfer::{Buffer, Bulk, In, Out};
use nusb::{Endpoint, MaybeFuture};

use emsflash_core::transport::{Space, Transport};
use emsflash_core::Error as CoreError;

/// USB vendor id of the programmer.
pub const EMS_VID: u16 = 0x4670;
/// USB product id of the programmer.
pub const EMS_PID: u16 = 0x9394;

const EP_OUT: u8 = 0x02;
const EP_IN: u8 = 0x81;

const CMD_READ: u8 = 0xff;
const CMD_WRITE: u8 = 0x57;

const FRAME_LEN: usize = 9;
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(5);

/// Encode the 9-byte command frame heading every transfer.
fn command_frame(cmd: u8, addr: u32, len: u32) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = cmd;
    frame[1..5].copy_from_slice(&addr.to_be_bytes());
    frame[5..9].copy_from_slice(&len.to_be_bytes());
    frame
}

/// An opened EMS cartridge programmer.
pub struct UsbCart {
    out_ep: Endpoint<Bulk, Out>,
    in_ep: Endpoint<Bulk, In>,
}

impl UsbCart {
    /// Find and claim the first cartridge programmer on the bus.
    pub fn open() -> Result<Self> {
        let device_info = nusb::list_devices()
            .wait()
            .map_err(|e| UsbCartError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == EMS_VID && d.product_id() == EMS_PID)
            .ok_or(UsbCartError::DeviceNotFound)?;

        log::info!(
            "opening EMS cart at bus {} address {}",
            device_info.busnum(),
            device_info.device_address()
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| UsbCartError::OpenFailed(e.to_string()))?;

        let interface = device
            .claim_interface(0)
            .wait()
            .map_err(|e| UsbCartError::ClaimFailed(e.to_string()))?;

        let out_ep = interface
            .endpoint::<Bulk, Out>(EP_OUT)
            .map_err(|e| UsbCartError::ClaimFailed(e.to_string()))?;
        let in_ep = interface
            .endpoint::<Bulk, In>(EP_IN)
            .map_err(|e| UsbCartError::ClaimFailed(e.to_string()))?;

        Ok(UsbCart { out_ep, in_ep })
    }

    fn bulk_out(&mut self, data: &[u8]) -> Result<()> {
        let mut buf = Buffer::new(data.len());
        buf.extend_from_slice(data);

        let completion = self.out_ep.transfer_blocking(buf, TRANSFER_TIMEOUT);
        completion
            .into_result()
            .map_err(|e| UsbCartError::TransferFailed(e.to_string()))?;

        log::trace!("USB write {} bytes", data.len());
        Ok(())
    }

    fn bulk_in(&mut self, buf: &mut [u8]) -> Result<()> {
        let max_packet_size = self.in_ep.max_packet_size();
        let mut filled = 0;

        while filled < buf.len() {
            let remaining = buf.len() - filled;
            let request_len = remaining.div_ceil(max_packet_size) * max_packet_size;
            let mut in_buf = Buffer::new(request_len);
            in_buf.set_requested_len(request_len);

            let completion = self.in_ep.transfer_blocking(in_buf, TRANSFER_TIMEOUT);
            let data = completion
                .into_result()
                .map_err(|e| UsbCartError::TransferFailed(e.to_string()))?;

            if data.is_empty() {
                return Err(UsbCartError::TransferFailed("short read".into()));
            }
            let take = data.len().min(remaining);
            buf[filled..filled + take].copy_from_slice(&data[..take]);
            filled += take;
        }

        log::trace!("USB read {} bytes", buf.len());
        Ok(())
    }
}

impl Transport for UsbCart {
    fn read(
        &mut self,
        space: Space,
        offset: u32,
        buf: &mut [u8],
    ) -> emsflash_core::Result<()> {
        if space == Space::Sram {
            log::warn!("SRAM access over USB is not supported");
            return Err(CoreError::Usb { offset });
        }

        let frame = command_frame(CMD_READ, offset, buf.len() as u32);
        self.bulk_out(&frame)
            .and_then(|()| self.bulk_in(buf))
            .map_err(|e| {
                log::warn!("{e}");
                CoreError::Usb { offset }
            })
    }

    fn write(&mut self, space: Space, offset: u32, data: &[u8]) -> emsflash_core::Result<()> {
        if space == Space::Sram {
            log::warn!("SRAM access over USB is not supported");
            return Err(CoreError::Usb { offset });
        }

        // no scatter/gather on bulk pipes: frame and payload go out in one
        // transfer
        let mut out = Vec::with_capacity(FRAME_LEN + data.len());
        out.extend_from_slice(&command_frame(CMD_WRITE, offset, data.len() as u32));
        out.extend_from_slice(data);

        self.bulk_out(&out).map_err(|e| {
            log::warn!("{e}");
            CoreError::Usb { offset }
        })
    }
}
