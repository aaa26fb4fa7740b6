pub mod fakes;
pub mod sim;

use peercall_lib::peer::IceCandidate;

/// host-кандидат с заданным портом
#[allow(dead_code)]
pub fn host_candidate(port: u16) -> IceCandidate {
    let mut candidate = IceCandidate::new(format!(
        "candidate:1 1 udp 2130706431 192.168.1.10 {port} typ host"
    ));
    candidate.sdp_mid = Some("0".into());
    candidate.sdp_mline_index = Some(0);
    candidate
}
