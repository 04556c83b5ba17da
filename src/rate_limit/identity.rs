/// Client key for admission control.
///
/// Prefers the first hop of `X-Forwarded-For`, then `X-Real-IP`, then the socket's
/// remote address. Blank header values are ignored.
pub fn client_identity(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    remote_addr: &str,
) -> String {
    let first_hop = forwarded_for
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = real_ip.map(str::trim).filter(|v| !v.is_empty());

    first_hop.or(real_ip).unwrap_or(remote_addr).to_string()
}
