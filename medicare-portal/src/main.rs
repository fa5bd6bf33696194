//! MediCare+ portal driver: headless walk through the portal's flows.
//!
//! Wires a `SessionStore` and `LiveCollectionSync` to the in-memory backend,
//! then signs in as the admin and the demo patient, mounts the dashboard and
//! the patient portal, and renders them to the log after each change.

mod state;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;
use medicare_core::{
    AppointmentPatch, AppointmentStatus, ContactForm, ContactPatch, ContactStatus, DoctorQuery,
    Gate, Requirement, SpecialtyFilter,
};
use medicare_sync::memory::demo_appointment;
use medicare_sync::{
    Credentials, InMemoryBackend, LiveCollectionSync, SessionConfig, SessionStore, SyncConfig, SyncEvent,
};
use state::{
    demo_doctors, render_directory, render_gate, DashboardView, Mounted, PatientPortalView, PortalConfig,
    PortalError,
};
use tokio::time::{timeout, Duration};

const SETTLE: Duration = Duration::from_secs(2);

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn seed_demo(backend: &InMemoryBackend, config: &PortalConfig) {
    for email in &config.admin_emails {
        let password = if email.eq_ignore_ascii_case(&config.admin.email) {
            config.admin.password.as_str()
        } else {
            "changeme"
        };
        backend.register_user(email, password, Some("admin"));
    }
    backend.register_user(&config.patient.email, &config.patient.password, Some("patient"));

    let base = now_millis();
    let rows = [
        ("apt-1001", "pending", "2024-02-15", "10:00 AM"),
        ("apt-1002", "confirmed", "2024-02-16", "2:30 PM"),
        ("apt-1003", "completed", "2024-01-20", "9:00 AM"),
        ("apt-1004", "pending", "2024-02-18", "11:15 AM"),
    ];
    for (offset, (id, status, date, time)) in rows.into_iter().enumerate() {
        let mut appointment = demo_appointment(id, base - offset as i64 * 60_000, status);
        appointment.date = date.to_string();
        appointment.time = time.to_string();
        appointment.patient_email = config.patient.email.clone();
        if offset % 2 == 1 {
            appointment.patient_name = "Emma Wilson".to_string();
            appointment.patient_email = "emma@example.com".to_string();
            appointment.doctor = "Dr. Michael Chen".to_string();
            appointment.department = "Neurology".to_string();
        }
        backend.seed(appointment);
    }
    info!("Seeded demo backend with {} appointments", rows.len());
}

async fn admin_session(sync: &LiveCollectionSync, config: &PortalConfig) -> Result<(), PortalError> {
    let credentials = Credentials::new(&config.admin.email, &config.admin.password);
    let identity = sync.sessions().login(&credentials).await?;
    info!("Admin signed in as {}", identity.label());

    let dashboard = DashboardView::mount(sync)?.ready()?;
    let listener = dashboard.appointments.on_change(|event| match event {
        SyncEvent::UpdateFailed { id, cause } | SyncEvent::RemoveFailed { id, cause } => {
            log::warn!("Dashboard: change to {id} was undone ({cause})");
        }
        SyncEvent::MalformedRecord { error } | SyncEvent::RecordRejected { error } => {
            log::warn!("Dashboard: {error}");
        }
        _ => {}
    });

    timeout(SETTLE, dashboard.appointments.wait_for(|s| !s.is_empty()))
        .await
        .map_err(|_| PortalError::NotMounted(Gate::Pending))??;
    timeout(SETTLE, dashboard.messages.wait_for(|s| !s.is_empty()))
        .await
        .map_err(|_| PortalError::NotMounted(Gate::Pending))??;
    info!("\n{}", dashboard.render());

    dashboard
        .appointments
        .update("apt-1001", AppointmentPatch::status(AppointmentStatus::Confirmed))
        .await?;
    dashboard.appointments.remove("apt-1003").await?;
    info!("\n{}", dashboard.render());

    if let Some(message) = dashboard.messages.snapshot().records.first() {
        dashboard
            .messages
            .update(&message.id, ContactPatch::status(ContactStatus::Read))
            .await?;
    }
    let summary = dashboard.summary();
    info!(
        "Dashboard summary: {} appointments, {} unread messages",
        summary.total_appointments, summary.unread_messages
    );

    drop(dashboard);
    let _ = listener.await;
    sync.sessions().logout().await;
    Ok(())
}

async fn submit_contact_form(sync: &LiveCollectionSync) -> Result<(), PortalError> {
    // Shape of the public form's POST body.
    let body = r#"{
        "firstName": "Jane",
        "lastName": "Smith",
        "email": "jane@example.com",
        "subject": "Billing question",
        "message": "Could you resend my last invoice?"
    }"#;
    let form: ContactForm = serde_json::from_str(body)?;
    let message = form.submit(now_millis())?;
    sync.create(&message).await?;
    info!("Contact message {} submitted", message.id);
    Ok(())
}

async fn patient_session(sync: &LiveCollectionSync, config: &PortalConfig) -> Result<(), PortalError> {
    let credentials = Credentials::new(&config.patient.email, &config.patient.password);
    sync.sessions().login(&credentials).await?;

    match DashboardView::mount(sync)? {
        Mounted::Ready(_) => log::error!("Patient was allowed into the dashboard"),
        Mounted::Loading | Mounted::Denied => {
            let gate = sync.sessions().current_session().gate(Requirement::Admin);
            info!("{}", render_gate("Dashboard", gate));
        }
    }

    let portal = PatientPortalView::mount(sync)?.ready()?;
    timeout(SETTLE, portal.appointments.wait_for(|s| !s.is_empty()))
        .await
        .map_err(|_| PortalError::NotMounted(Gate::Pending))??;
    info!("\n{}", portal.render());
    info!("{} upcoming appointment(s)", portal.upcoming().len());

    drop(portal);
    sync.sessions().logout().await;
    Ok(())
}

async fn run(config: PortalConfig) -> Result<(), PortalError> {
    let backend = InMemoryBackend::new();
    seed_demo(&backend, &config);

    let sessions = SessionStore::new(
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
        SessionConfig::default(),
    );
    let follower = sessions.attach();
    let sync = LiveCollectionSync::new(Arc::new(backend.clone()), sessions, SyncConfig::default());

    let doctors = demo_doctors();
    info!("\n{}", render_directory(&doctors, &DoctorQuery::new("", SpecialtyFilter::All)));
    info!(
        "\n{}",
        render_directory(&doctors, &DoctorQuery::new("card", SpecialtyFilter::parse("all")))
    );

    submit_contact_form(&sync).await?;
    admin_session(&sync, &config).await?;
    patient_session(&sync, &config).await?;

    let stats = backend.stats();
    info!(
        "Backend: {} subscribes, {} unsubscribes, {} writes, {} deletes, {} adds",
        stats.subscribes, stats.unsubscribes, stats.writes, stats.deletes, stats.adds
    );
    follower.abort();
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting MediCare+ portal driver...");
    let config = PortalConfig::from_env();
    if let Err(e) = run(config).await {
        log::error!("Portal driver failed: {e}");
        std::process::exit(1);
    }
}
