//! Test patients with their user accounts, notes, appointments and charts.
//!
//! Every patient is written in its own transaction, so one failure leaves the
//! others in place and never a half-built patient.
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::Rng;
use sqlx::PgConnection;
use tracing::{error, info};

use crate::util::db::{finish_tx, Db, PgTx};
use crate::util::ids::insert_with_fresh_id;

pub const DEFAULT_PATIENT_COUNT: usize = 10;
const COUNTRY: &str = "Canada";
const EMAIL_DOMAIN: &str = "testpatient.com";
/// Not a usable bcrypt hash; seeded users cannot log in until they reset.
const PLACEHOLDER_PASSWORD_HASH: &str =
    "$2a$10$xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx";
const CHECK_IN_LEAD_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppointmentTemplate {
    pub status: &'static str,
    pub days_from_now: i64,
    pub duration_minutes: i64,
    pub notes: &'static str,
}

const fn appt(
    status: &'static str,
    days_from_now: i64,
    duration_minutes: i64,
    notes: &'static str,
) -> AppointmentTemplate {
    AppointmentTemplate {
        status,
        days_from_now,
        duration_minutes,
        notes,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartTemplate {
    pub status: &'static str,
    pub visible_to_patient: bool,
}

const COMPLETED_VISIBLE_CHART: ChartTemplate = ChartTemplate {
    status: "completed",
    visible_to_patient: true,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatientTemplate {
    pub first_name: &'static str,
    pub last_name: &'static str,
    pub gender: &'static str,
    pub date_of_birth: (i32, u32, u32),
    pub mobile: &'static str,
    pub address_line1: &'static str,
    pub city: &'static str,
    pub province_state: &'static str,
    pub postal_code: &'static str,
    /// Name, relationship, phone.
    pub emergency_contact: (&'static str, &'static str, &'static str),
    pub referral_type: &'static str,
    pub referral_detail: Option<&'static str>,
    pub pronouns: &'static str,
    pub notes: &'static [&'static str],
    pub appointments: &'static [AppointmentTemplate],
    pub charts: &'static [ChartTemplate],
}

impl PatientTemplate {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    fn date_of_birth(&self) -> Option<DateTime<Utc>> {
        let (y, m, d) = self.date_of_birth;
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }
}

pub const PATIENT_TEMPLATES: [PatientTemplate; 10] = [
    PatientTemplate {
        first_name: "Marcus",
        last_name: "Williams",
        gender: "male",
        date_of_birth: (1987, 2, 14),
        mobile: "+19055550101",
        address_line1: "123 Main Street",
        city: "Markham",
        province_state: "Ontario",
        postal_code: "L3R 5K4",
        emergency_contact: ("Lisa Williams", "Wife", "+19055550102"),
        referral_type: "Online Search",
        referral_detail: None,
        pronouns: "he/him",
        notes: &[
            "Active lifestyle - runs marathons",
            "Prefers early morning appointments",
        ],
        appointments: &[
            appt("completed", -14, 60, "Sports injury assessment"),
            appt("scheduled", 3, 45, "Follow-up treatment"),
        ],
        charts: &[COMPLETED_VISIBLE_CHART],
    },
    PatientTemplate {
        first_name: "Jennifer",
        last_name: "Lee",
        gender: "female",
        date_of_birth: (1978, 11, 8),
        mobile: "+14165550301",
        address_line1: "789 Pine Road",
        city: "Calgary",
        province_state: "Alberta",
        postal_code: "T2P 1J9",
        emergency_contact: ("David Chen", "Spouse", "+14165550302"),
        referral_type: "Doctor Referral",
        referral_detail: Some("Dr. Smith"),
        pronouns: "she/her",
        notes: &[
            "Long-term patient - member since 2020",
            "Prefers afternoon appointments",
        ],
        appointments: &[
            appt("completed", -60, 45, "Regular check-up"),
            appt("scheduled", 14, 45, "Follow-up treatment"),
        ],
        charts: &[COMPLETED_VISIBLE_CHART],
    },
    PatientTemplate {
        first_name: "David",
        last_name: "Kumar",
        gender: "male",
        date_of_birth: (1982, 9, 10),
        mobile: "+19055550301",
        address_line1: "789 Elgin Mills",
        city: "Richmond Hill",
        province_state: "Ontario",
        postal_code: "L4S 1A3",
        emergency_contact: ("Priya Kumar", "Wife", "+19055550302"),
        referral_type: "Doctor Referral",
        referral_detail: Some("Dr. Singh"),
        pronouns: "he/him",
        notes: &[
            "IT professional - desk job",
            "Chronic back pain",
        ],
        appointments: &[
            appt("completed", -21, 60, "Initial assessment completed"),
            appt("scheduled", 7, 45, "Continuing treatment"),
        ],
        charts: &[COMPLETED_VISIBLE_CHART],
    },
    PatientTemplate {
        first_name: "Michelle",
        last_name: "Patel",
        gender: "female",
        date_of_birth: (1995, 9, 12),
        mobile: "+16135550501",
        address_line1: "654 Birch Lane",
        city: "Ottawa",
        province_state: "Ontario",
        postal_code: "K1A 0A9",
        emergency_contact: ("Raj Patel", "Father", "+16135550502"),
        referral_type: "Social Media",
        referral_detail: None,
        pronouns: "she/her",
        notes: &[
            "Student - prefers evening appointments",
        ],
        appointments: &[
            appt("completed", -7, 45, "Consultation completed"),
        ],
        charts: &[COMPLETED_VISIBLE_CHART],
    },
    PatientTemplate {
        first_name: "Steven",
        last_name: "Park",
        gender: "male",
        date_of_birth: (1985, 11, 30),
        mobile: "+19055550501",
        address_line1: "567 Warden Avenue",
        city: "Markham",
        province_state: "Ontario",
        postal_code: "L6E 1A1",
        emergency_contact: ("Grace Park", "Sister", "+19055550502"),
        referral_type: "Social Media",
        referral_detail: None,
        pronouns: "he/him",
        notes: &[
            "Tech entrepreneur - irregular schedule",
            "Interested in preventative care",
        ],
        appointments: &[
            appt("completed", -30, 60, "Initial wellness consultation"),
            appt("scheduled", 14, 45, "Follow-up wellness check"),
        ],
        charts: &[COMPLETED_VISIBLE_CHART],
    },
    PatientTemplate {
        first_name: "Amanda",
        last_name: "Williams",
        gender: "female",
        date_of_birth: (2000, 4, 18),
        mobile: "+19025550701",
        address_line1: "147 Spruce Street",
        city: "Halifax",
        province_state: "Nova Scotia",
        postal_code: "B3H 3A1",
        emergency_contact: ("Jennifer Williams", "Mother", "+19025550702"),
        referral_type: "Online Search",
        referral_detail: None,
        pronouns: "she/her",
        notes: &[
            "New patient - first appointment scheduled",
        ],
        appointments: &[
            appt("scheduled", 2, 60, "First consultation"),
        ],
        charts: &[],
    },
    PatientTemplate {
        first_name: "Ryan",
        last_name: "Patel",
        gender: "male",
        date_of_birth: (1995, 8, 5),
        mobile: "+19055550701",
        address_line1: "123 Bur Oak Avenue",
        city: "Markham",
        province_state: "Ontario",
        postal_code: "L6C 0H4",
        emergency_contact: ("Nina Patel", "Mother", "+19055550702"),
        referral_type: "Online Search",
        referral_detail: None,
        pronouns: "he/him",
        notes: &[
            "Student athlete - hockey player",
            "Sports injury recovery",
        ],
        appointments: &[
            appt("completed", -3, 60, "Sports injury assessment"),
            appt("scheduled", 4, 45, "Rehabilitation session"),
        ],
        charts: &[COMPLETED_VISIBLE_CHART],
    },
    PatientTemplate {
        first_name: "Nicole",
        last_name: "Garcia",
        gender: "female",
        date_of_birth: (1991, 8, 27),
        mobile: "+12505550901",
        address_line1: "369 Redwood Drive",
        city: "Victoria",
        province_state: "British Columbia",
        postal_code: "V8W 1N4",
        emergency_contact: ("Carlos Garcia", "Brother", "+12505550902"),
        referral_type: "Doctor Referral",
        referral_detail: Some("Dr. Anderson"),
        pronouns: "she/her",
        notes: &[
            "Travels frequently for work",
            "Prefers virtual appointments when possible",
        ],
        appointments: &[
            appt("completed", -90, 60, "Previous consultation"),
            appt("scheduled", 21, 45, "Routine check-up"),
        ],
        charts: &[COMPLETED_VISIBLE_CHART],
    },
    PatientTemplate {
        first_name: "Kevin",
        last_name: "Wong",
        gender: "male",
        date_of_birth: (1979, 4, 25),
        mobile: "+19055550901",
        address_line1: "789 McCowan Road",
        city: "Markham",
        province_state: "Ontario",
        postal_code: "L3P 3J3",
        emergency_contact: ("Susan Wong", "Wife", "+19055550902"),
        referral_type: "Doctor Referral",
        referral_detail: Some("Dr. Johnson"),
        pronouns: "he/him",
        notes: &[
            "Long-term patient since 2018",
            "Chronic neck pain from desk work",
        ],
        appointments: &[
            appt("completed", -20, 60, "Regular treatment"),
            appt("scheduled", 10, 45, "Ongoing care"),
        ],
        charts: &[COMPLETED_VISIBLE_CHART],
    },
    PatientTemplate {
        first_name: "Laura",
        last_name: "Rodriguez",
        gender: "female",
        date_of_birth: (1986, 10, 12),
        mobile: "+19055551001",
        address_line1: "321 Major Mackenzie",
        city: "Richmond Hill",
        province_state: "Ontario",
        postal_code: "L4C 9M7",
        emergency_contact: ("Carlos Rodriguez", "Brother", "+19055551002"),
        referral_type: "Insurance Provider",
        referral_detail: None,
        pronouns: "she/her",
        notes: &[
            "Physiotherapist herself - very knowledgeable",
            "Prefers evidence-based treatment",
        ],
        appointments: &[
            appt("completed", -40, 60, "Professional consultation"),
            appt("scheduled", 20, 60, "Follow-up consultation"),
        ],
        charts: &[COMPLETED_VISIBLE_CHART],
    },
];

/// Ids every seeded row points at. All must already exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedContext {
    pub org_id: String,
    pub location_id: String,
    pub staff_id: String,
    pub created_by: String,
    pub service_offering_id: String,
    pub ownership_group_id: String,
}

/// Unique per run: `first.last.<millis + index>@testpatient.com`.
pub fn email_for(t: &PatientTemplate, stamp_millis: i64, index: usize) -> String {
    format!(
        "{}.{}.{}@{EMAIL_DOMAIN}",
        t.first_name.to_lowercase(),
        t.last_name.to_lowercase(),
        stamp_millis + index as i64
    )
}

pub fn username_for<R: Rng + ?Sized>(t: &PatientTemplate, rng: &mut R) -> String {
    format!(
        "{}.{}{}",
        t.first_name.to_lowercase(),
        t.last_name.to_lowercase(),
        rng.gen_range(0..1000)
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAppointment {
    pub status: &'static str,
    pub start: DateTime<Utc>,
    pub duration_minutes: i64,
    pub notes: &'static str,
    /// Check-in and check-out, only for completed visits.
    pub check_in: Option<DateTime<Utc>>,
    pub check_out: Option<DateTime<Utc>>,
}

pub fn plan_appointment(t: &AppointmentTemplate, now: DateTime<Utc>) -> PlannedAppointment {
    let start = now + Duration::days(t.days_from_now);
    let completed = t.status == "completed";
    PlannedAppointment {
        status: t.status,
        start,
        duration_minutes: t.duration_minutes,
        notes: t.notes,
        check_in: completed.then(|| start - Duration::minutes(CHECK_IN_LEAD_MINUTES)),
        check_out: completed.then(|| start + Duration::minutes(t.duration_minutes)),
    }
}

/// Chart `i` documents appointment `i`, or the last one when there are fewer
/// appointments than charts. No appointments means no charts.
pub fn chart_appointment(chart_index: usize, appointments: usize) -> Option<usize> {
    appointments.checked_sub(1).map(|last| chart_index.min(last))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeededPatient {
    pub name: String,
    pub user_id: String,
    pub patient_id: String,
    pub notes: usize,
    pub appointments: usize,
    pub charts: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatientSeedReport {
    pub requested: usize,
    pub created: Vec<SeededPatient>,
    pub failures: Vec<(String, String)>,
}

async fn insert_user(
    conn: &mut PgConnection,
    t: &PatientTemplate,
    username: &str,
    email: &str,
) -> Result<String> {
    let t = *t;
    insert_with_fresh_id("_User", conn, |conn, id| {
        let (username, email) = (username.to_owned(), email.to_owned());
        Box::pin(async move {
            let (ec_name, ec_relationship, ec_phone) = t.emergency_contact;
            let res = sqlx::query(
                r#"INSERT INTO "_User"
                   ("objectId", "createdAt", "updatedAt", "username", "email", "_hashed_password",
                    "firstName", "lastName", "gender", "dateOfBirth", "mobile",
                    "addressLine1", "city", "provinceState", "country", "postalZipCode",
                    "emergencyContactName", "emergencyContactRelationship", "emergencyContactPhone",
                    "isOnboardingComplete")
                   VALUES ($1, NOW(), NOW(), $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                           $14, $15, $16, $17, true)
                   ON CONFLICT ("objectId") DO NOTHING"#,
            )
            .persistent(false)
            .bind(id)
            .bind(&username)
            .bind(&email)
            .bind(PLACEHOLDER_PASSWORD_HASH)
            .bind(t.first_name)
            .bind(t.last_name)
            .bind(t.gender)
            .bind(t.date_of_birth())
            .bind(t.mobile)
            .bind(t.address_line1)
            .bind(t.city)
            .bind(t.province_state)
            .bind(COUNTRY)
            .bind(t.postal_code)
            .bind(ec_name)
            .bind(ec_relationship)
            .bind(ec_phone)
            .execute(conn)
            .await
            .with_context(|| format!("insert _User {username}"))?;
            Ok(res.rows_affected() == 1)
        })
    })
    .await
}

async fn insert_patient(
    conn: &mut PgConnection,
    ctx: &SeedContext,
    t: &PatientTemplate,
    user_id: &str,
    email: &str,
) -> Result<String> {
    let t = *t;
    insert_with_fresh_id("Patient", conn, |conn, id| {
        let (ctx, user_id, email) = (ctx.clone(), user_id.to_owned(), email.to_owned());
        Box::pin(async move {
            let (ec_name, ec_relationship, ec_phone) = t.emergency_contact;
            let res = sqlx::query(
                r#"INSERT INTO "Patient"
                   ("objectId", "createdAt", "updatedAt", "userId", "orgId", "firstName", "lastName",
                    "email", "mobile", "gender", "dateOfBirth",
                    "addressLine1", "city", "provinceState", "country", "postalZipCode",
                    "emergencyContactName", "emergencyContactRelationship", "emergencyContactPhone",
                    "referralType", "referralDetail", "pronouns",
                    "syncEnabled", "allowNotifications", "isBlacklisted", "isDeceased",
                    "patientSince", "createdBy")
                   VALUES ($1, NOW(), NOW(), $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                           $14, $15, $16, $17, $18, $19, $20, true, true, false, false, NOW(), $21)
                   ON CONFLICT ("objectId") DO NOTHING"#,
            )
            .persistent(false)
            .bind(id)
            .bind(&user_id)
            .bind(&ctx.org_id)
            .bind(t.first_name)
            .bind(t.last_name)
            .bind(&email)
            .bind(t.mobile)
            .bind(t.gender)
            .bind(t.date_of_birth())
            .bind(t.address_line1)
            .bind(t.city)
            .bind(t.province_state)
            .bind(COUNTRY)
            .bind(t.postal_code)
            .bind(ec_name)
            .bind(ec_relationship)
            .bind(ec_phone)
            .bind(t.referral_type)
            .bind(t.referral_detail)
            .bind(t.pronouns)
            .bind(&ctx.created_by)
            .execute(conn)
            .await
            .with_context(|| format!("insert Patient {}", t.full_name()))?;
            Ok(res.rows_affected() == 1)
        })
    })
    .await
}

async fn insert_group_membership(
    conn: &mut PgConnection,
    ctx: &SeedContext,
    patient_id: &str,
) -> Result<String> {
    insert_with_fresh_id("Ownership_Group_Patient", conn, |conn, id| {
        let (group_id, patient_id) = (ctx.ownership_group_id.clone(), patient_id.to_owned());
        Box::pin(async move {
            let res = sqlx::query(
                r#"INSERT INTO "Ownership_Group_Patient"
                   ("objectId", "createdAt", "updatedAt", "ownershipGroupId", "patientId", "isActive")
                   VALUES ($1, NOW(), NOW(), $2, $3, true)
                   ON CONFLICT ("objectId") DO NOTHING"#,
            )
            .persistent(false)
            .bind(id)
            .bind(&group_id)
            .bind(&patient_id)
            .execute(conn)
            .await
            .context("insert Ownership_Group_Patient")?;
            Ok(res.rows_affected() == 1)
        })
    })
    .await
}

async fn insert_note(
    conn: &mut PgConnection,
    ctx: &SeedContext,
    patient_id: &str,
    text: &str,
    pinned: bool,
) -> Result<String> {
    insert_with_fresh_id("Patient_Note", conn, |conn, id| {
        let (created_by, patient_id, text) =
            (ctx.created_by.clone(), patient_id.to_owned(), text.to_owned());
        Box::pin(async move {
            let res = sqlx::query(
                r#"INSERT INTO "Patient_Note"
                   ("objectId", "createdAt", "updatedAt", "patientId", "text", "isPinned", "createdBy")
                   VALUES ($1, NOW(), NOW(), $2, $3, $4, $5)
                   ON CONFLICT ("objectId") DO NOTHING"#,
            )
            .persistent(false)
            .bind(id)
            .bind(&patient_id)
            .bind(&text)
            .bind(pinned)
            .bind(&created_by)
            .execute(conn)
            .await
            .context("insert Patient_Note")?;
            Ok(res.rows_affected() == 1)
        })
    })
    .await
}

async fn insert_appointment(
    conn: &mut PgConnection,
    ctx: &SeedContext,
    patient_id: &str,
    appt: &PlannedAppointment,
) -> Result<String> {
    insert_with_fresh_id("Appointment", conn, |conn, id| {
        let (ctx, patient_id, appt) = (ctx.clone(), patient_id.to_owned(), appt.clone());
        Box::pin(async move {
            let staff_stamp = appt.check_in.map(|_| ctx.created_by.clone());
            let res = sqlx::query(
                r#"INSERT INTO "Appointment"
                   ("objectId", "createdAt", "updatedAt", "patientId", "orgId", "locationId",
                    "staffId", "serviceOfferingId", "startTime", "duration", "status", "notes",
                    "createdBy", "checkInAt", "checkInBy", "checkOutAt", "checkOutBy")
                   VALUES ($1, NOW(), NOW(), $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                           $14, $13)
                   ON CONFLICT ("objectId") DO NOTHING"#,
            )
            .persistent(false)
            .bind(id)
            .bind(&patient_id)
            .bind(&ctx.org_id)
            .bind(&ctx.location_id)
            .bind(&ctx.staff_id)
            .bind(&ctx.service_offering_id)
            .bind(appt.start)
            .bind(appt.duration_minutes as f64)
            .bind(appt.status)
            .bind(appt.notes)
            .bind(&ctx.created_by)
            .bind(appt.check_in)
            .bind(&staff_stamp)
            .bind(appt.check_out)
            .execute(conn)
            .await
            .with_context(|| format!("insert Appointment ({})", appt.status))?;
            Ok(res.rows_affected() == 1)
        })
    })
    .await
}

async fn insert_chart(
    conn: &mut PgConnection,
    ctx: &SeedContext,
    patient_id: &str,
    appointment_id: &str,
    chart: ChartTemplate,
) -> Result<String> {
    insert_with_fresh_id("Chart", conn, |conn, id| {
        let (ctx, patient_id, appointment_id) =
            (ctx.clone(), patient_id.to_owned(), appointment_id.to_owned());
        Box::pin(async move {
            let signed = chart.status == "completed";
            let res = sqlx::query(
                r#"INSERT INTO "Chart"
                   ("objectId", "createdAt", "updatedAt", "patientId", "appointmentId", "status",
                    "isVisibleToPatient", "createdBy", "signedAt", "signedByProviderId",
                    "isBlackBoxed")
                   VALUES ($1, NOW(), NOW(), $2, $3, $4, $5, $6,
                           CASE WHEN $7 THEN NOW() END, $8, false)
                   ON CONFLICT ("objectId") DO NOTHING"#,
            )
            .persistent(false)
            .bind(id)
            .bind(&patient_id)
            .bind(&appointment_id)
            .bind(chart.status)
            .bind(chart.visible_to_patient)
            .bind(&ctx.created_by)
            .bind(signed)
            .bind(signed.then(|| ctx.staff_id.clone()))
            .execute(conn)
            .await
            .context("insert Chart")?;
            Ok(res.rows_affected() == 1)
        })
    })
    .await
}

async fn seed_patient(
    tx: &mut PgTx,
    ctx: &SeedContext,
    t: &PatientTemplate,
    email: &str,
    username: &str,
    now: DateTime<Utc>,
) -> Result<SeededPatient> {
    let user_id = insert_user(&mut **tx, t, username, email).await?;
    info!(username, user_id = %user_id, "user created");
    let patient_id = insert_patient(&mut **tx, ctx, t, &user_id, email).await?;
    info!(patient = %t.full_name(), patient_id = %patient_id, "patient created");
    insert_group_membership(&mut **tx, ctx, &patient_id).await?;

    for (i, note) in t.notes.iter().enumerate() {
        insert_note(&mut **tx, ctx, &patient_id, note, i == 0).await?;
    }

    let mut appointment_ids = Vec::with_capacity(t.appointments.len());
    for template in t.appointments {
        let planned = plan_appointment(template, now);
        appointment_ids.push(insert_appointment(&mut **tx, ctx, &patient_id, &planned).await?);
    }

    let mut charts = 0;
    for (i, chart) in t.charts.iter().enumerate() {
        let Some(idx) = chart_appointment(i, appointment_ids.len()) else {
            break;
        };
        insert_chart(&mut **tx, ctx, &patient_id, &appointment_ids[idx], *chart).await?;
        charts += 1;
    }

    Ok(SeededPatient {
        name: t.full_name(),
        user_id,
        patient_id,
        notes: t.notes.len(),
        appointments: appointment_ids.len(),
        charts,
    })
}

/// Seed the first `count` templates (capped at the number of templates).
pub async fn seed_patients(
    db: &Db,
    ctx: &SeedContext,
    count: usize,
    dry_run: bool,
) -> Result<PatientSeedReport> {
    let templates = &PATIENT_TEMPLATES[..count.min(PATIENT_TEMPLATES.len())];
    let mut report = PatientSeedReport {
        requested: templates.len(),
        ..Default::default()
    };
    let now = Utc::now();

    for (index, t) in templates.iter().enumerate() {
        println!("\n{}", "=".repeat(60));
        println!("Patient {}: {}", index + 1, t.full_name());
        let email = email_for(t, now.timestamp_millis(), index);
        let username = username_for(t, &mut rand::thread_rng());

        let mut tx = db.begin().await?;
        let outcome = seed_patient(&mut tx, ctx, t, &email, &username, now).await;
        let outcome = if dry_run {
            tx.rollback().await.context("ROLLBACK failed")?;
            outcome
        } else {
            finish_tx(tx, outcome).await
        };
        match outcome {
            Ok(p) => {
                println!(
                    "  {} {} ({} notes, {} appointments, {} charts)",
                    if dry_run { "would create" } else { "created" },
                    p.patient_id,
                    p.notes,
                    p.appointments,
                    p.charts
                );
                report.created.push(p);
            }
            Err(e) => {
                error!(patient = %t.full_name(), error = %e, "patient seed failed");
                report.failures.push((t.full_name(), format!("{e:#}")));
            }
        }
    }
    Ok(report)
}
