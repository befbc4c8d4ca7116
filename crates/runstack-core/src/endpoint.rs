//! Service endpoint addresses.

/// The deterministic URL the hosting platform assigns a service:
/// `https://<service>-<project number>.<region>.run.app`.
pub fn predict_service_url(service: &str, project_number: &str, region: &str) -> String {
    format!("https://{service}-{project_number}.{region}.run.app")
}

/// Render a request timeout the way the platform API expects it (`5s`, `2.5s`).
pub fn duration_string(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    let nanos = duration.subsec_nanos();
    if nanos == 0 {
        return format!("{secs}s");
    }
    let frac = format!("{nanos:09}");
    format!("{secs}.{}s", frac.trim_end_matches('0'))
}
