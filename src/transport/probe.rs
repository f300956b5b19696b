//! Vendor interface selection from a device's configuration descriptors.

/// `bInterfaceClass` of the live-training interface.
pub const VENDOR_CLASS: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Bulk,
    Interrupt,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Endpoint address including the direction bit.
    pub address: u8,
    pub direction: EndpointDirection,
    pub kind: EndpointKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternateSetting {
    pub class: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub alternates: Vec<AlternateSetting>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimedInterface {
    pub configuration: u8,
    pub interface: u8,
    pub in_endpoint: EndpointDescriptor,
    pub out_endpoint: EndpointDescriptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("no vendor-class interface with exactly one IN and one OUT endpoint")]
    NoUsableInterface,
}

/// Pick the first interface whose alternate setting is vendor class with a
/// single IN and a single OUT endpoint.
pub fn probe_configuration(
    configuration: u8,
    interfaces: &[InterfaceDescriptor],
) -> Result<ClaimedInterface, ProbeError> {
    interfaces
        .iter()
        .find_map(|iface| {
            iface
                .alternates
                .iter()
                .filter(|alt| alt.class == VENDOR_CLASS)
                .find_map(|alt| {
                    let (in_endpoint, out_endpoint) = single_pair(&alt.endpoints)?;
                    Some(ClaimedInterface {
                        configuration,
                        interface: iface.number,
                        in_endpoint,
                        out_endpoint,
                    })
                })
        })
        .ok_or(ProbeError::NoUsableInterface)
}

fn single_pair(
    endpoints: &[EndpointDescriptor],
) -> Option<(EndpointDescriptor, EndpointDescriptor)> {
    let mut ins = endpoints
        .iter()
        .filter(|ep| ep.direction == EndpointDirection::In);
    let mut outs = endpoints
        .iter()
        .filter(|ep| ep.direction == EndpointDirection::Out);

    match (ins.next(), ins.next(), outs.next(), outs.next()) {
        (Some(&input), None, Some(&output), None) => Some((input, output)),
        _ => None,
    }
}
