use std::time::Duration;

use async_trait::async_trait;
use nusb::transfer::{Direction, EndpointType, RequestBuffer, TransferError};
use tracing::{debug, info};

use super::probe::{
    AlternateSetting, ClaimedInterface, EndpointDescriptor, EndpointDirection, EndpointKind,
    InterfaceDescriptor, ProbeError, probe_configuration,
};
use super::{Transport, TransportError};
use crate::config::DeviceFilter;

#[derive(Debug, thiserror::Error)]
pub enum UsbTransportError {
    #[error("usb error: {0}")]
    Usb(#[from] std::io::Error),
    #[error("no usb device matches {vendor_id:04x}:{product_id:04x}")]
    NoMatchingDevice { vendor_id: u16, product_id: u16 },
    #[error("could not read active configuration: {0}")]
    Configuration(String),
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Claimed vendor interface of a USB keyboard, via `nusb`.
pub struct UsbTransport {
    interface: nusb::Interface,
    claimed: ClaimedInterface,
}

impl UsbTransport {
    /// Find the first device matching `filter`, probe its active
    /// configuration and claim the vendor interface.
    pub fn open(filter: &DeviceFilter) -> Result<Self, UsbTransportError> {
        let device_info = nusb::list_devices()?
            .find(|d| d.vendor_id() == filter.vendor_id && d.product_id() == filter.product_id)
            .ok_or(UsbTransportError::NoMatchingDevice {
                vendor_id: filter.vendor_id,
                product_id: filter.product_id,
            })?;

        info!(
            bus = device_info.bus_number(),
            address = device_info.device_address(),
            "found keyboard"
        );

        let device = device_info.open()?;
        let claimed = {
            let configuration = device
                .active_configuration()
                .map_err(|err| UsbTransportError::Configuration(err.to_string()))?;
            let interfaces = describe_interfaces(&configuration);
            probe_configuration(configuration.configuration_value(), &interfaces)?
        };

        let interface = device.detach_and_claim_interface(claimed.interface)?;
        debug!(
            interface = claimed.interface,
            in_endpoint = claimed.in_endpoint.address,
            out_endpoint = claimed.out_endpoint.address,
            "claimed vendor interface"
        );

        Ok(Self { interface, claimed })
    }

    pub fn claimed(&self) -> &ClaimedInterface {
        &self.claimed
    }
}

fn describe_interfaces(
    configuration: &nusb::descriptors::Configuration<'_>,
) -> Vec<InterfaceDescriptor> {
    configuration
        .interfaces()
        .map(|group| InterfaceDescriptor {
            number: group.interface_number(),
            alternates: group
                .alt_settings()
                .map(|alt| AlternateSetting {
                    class: alt.class(),
                    endpoints: alt
                        .endpoints()
                        .map(|ep| EndpointDescriptor {
                            address: ep.address(),
                            direction: match ep.direction() {
                                Direction::In => EndpointDirection::In,
                                Direction::Out => EndpointDirection::Out,
                            },
                            kind: match ep.transfer_type() {
                                EndpointType::Bulk => EndpointKind::Bulk,
                                EndpointType::Interrupt => EndpointKind::Interrupt,
                                _ => EndpointKind::Other,
                            },
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect()
}

fn map_transfer_error(err: TransferError) -> TransportError {
    match err {
        TransferError::Disconnected => TransportError::Disconnected(err.to_string()),
        other => TransportError::Io(other.to_string()),
    }
}

#[async_trait]
impl Transport for UsbTransport {
    async fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let endpoint = self.claimed.in_endpoint;
        let request = RequestBuffer::new(max_len);
        let transfer = match endpoint.kind {
            EndpointKind::Interrupt => self.interface.interrupt_in(endpoint.address, request),
            _ => self.interface.bulk_in(endpoint.address, request),
        };

        // Dropping the transfer future on timeout cancels it.
        let completion = tokio::time::timeout(timeout, transfer)
            .await
            .map_err(|_| TransportError::Timeout)?;
        completion.into_result().map_err(map_transfer_error)
    }

    async fn write(&self, packet: &[u8]) -> Result<(), TransportError> {
        let endpoint = self.claimed.out_endpoint;
        let transfer = match endpoint.kind {
            EndpointKind::Interrupt => {
                self.interface.interrupt_out(endpoint.address, packet.to_vec())
            }
            _ => self.interface.bulk_out(endpoint.address, packet.to_vec()),
        };

        transfer.await.into_result().map_err(map_transfer_error)?;
        Ok(())
    }
}
