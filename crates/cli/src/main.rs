use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pipa_core::config::{data_dir_from_env_value, load_policy};
use pipa_core::{
    AccessContext, AccessMediator, Actor, AuditAction, AuditFilter, ConsentId, CoreConfig,
    Decision, FieldClassifier, FieldName, FieldSet, FieldValues, NonEmptyText, Operation,
    PatientId, Purpose, Role, Sensitivity, WithdrawOutcome,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pipa")]
#[command(about = "Consent-gated, audited access to patient records")]
struct Cli {
    /// Client IP address recorded in audit entries
    #[arg(long, global = true)]
    ip: Option<String>,
    /// Client user agent recorded in audit entries
    #[arg(long, global = true)]
    user_agent: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// The staff member making the request.
#[derive(Args)]
struct ActorArgs {
    /// Actor id
    #[arg(long)]
    actor: NonEmptyText,
    /// Actor role (physician, nurse, admin, billing, receptionist)
    #[arg(long)]
    role: Role,
    /// Purpose of the access (treatment, billing, referral, research, emergency)
    #[arg(long)]
    purpose: Purpose,
    /// Actor display name, recorded in audit entries
    #[arg(long)]
    actor_name: Option<NonEmptyText>,
    /// Actor email, recorded in audit entries
    #[arg(long)]
    actor_email: Option<NonEmptyText>,
    /// Actor department, recorded in audit entries
    #[arg(long)]
    department: Option<NonEmptyText>,
}

impl ActorArgs {
    fn actor(&self) -> Actor {
        let mut actor = Actor::new(self.actor.clone(), self.role);
        if let Some(name) = &self.actor_name {
            actor = actor.with_name(name.clone());
        }
        if let Some(email) = &self.actor_email {
            actor = actor.with_email(email.clone());
        }
        if let Some(department) = &self.department {
            actor = actor.with_department(department.clone());
        }
        actor
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OperationArg {
    Read,
    Write,
}

impl From<OperationArg> for Operation {
    fn from(op: OperationArg) -> Self {
        match op {
            OperationArg::Read => Operation::Read,
            OperationArg::Write => Operation::Write,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new patient
    Register {
        #[command(flatten)]
        who: ActorArgs,
        /// Field values as name=value (value parsed as JSON, else taken as text)
        #[arg(long = "set", value_parser = parse_field_value)]
        values: Vec<(FieldName, serde_json::Value)>,
    },
    /// Record a patient's consent for a purpose
    Grant {
        patient_id: PatientId,
        #[arg(long)]
        purpose: Purpose,
        /// Who is granting (the patient or their representative)
        #[arg(long)]
        granted_by: NonEmptyText,
        /// Expiry as RFC 3339, e.g. 2027-01-01T00:00:00Z
        #[arg(long)]
        expires_at: Option<DateTime<Utc>>,
    },
    /// Withdraw a consent
    Withdraw {
        consent_id: ConsentId,
        /// Who is withdrawing
        #[arg(long)]
        actor: NonEmptyText,
    },
    /// Decide whether an access would be allowed, without touching the record
    Authorize {
        patient_id: PatientId,
        #[command(flatten)]
        who: ActorArgs,
        #[arg(long, value_enum, default_value = "read")]
        operation: OperationArg,
        /// Comma-separated field names
        #[arg(long, value_delimiter = ',')]
        fields: Vec<FieldName>,
    },
    /// Read fields of a patient record
    Read {
        patient_id: PatientId,
        #[command(flatten)]
        who: ActorArgs,
        /// Comma-separated field names
        #[arg(long, value_delimiter = ',', required = true)]
        fields: Vec<FieldName>,
    },
    /// Write fields of a patient record
    Write {
        patient_id: PatientId,
        #[command(flatten)]
        who: ActorArgs,
        /// Field values as name=value (value parsed as JSON, else taken as text)
        #[arg(long = "set", value_parser = parse_field_value, required = true)]
        values: Vec<(FieldName, serde_json::Value)>,
    },
    /// List a patient's consent history
    Consents { patient_id: PatientId },
    /// Show audit entries, oldest first
    Audit {
        #[arg(long)]
        action: Option<AuditAction>,
        #[arg(long)]
        actor: Option<NonEmptyText>,
        /// Patient or consent id
        #[arg(long)]
        resource: Option<String>,
        /// Every entry concerning this patient, consent changes included
        #[arg(long)]
        patient: Option<PatientId>,
        /// Inclusive lower bound, RFC 3339
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// Exclusive upper bound, RFC 3339
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show how field names are classified
    Classify {
        #[arg(required = true)]
        fields: Vec<FieldName>,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("pipa=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let context = AccessContext::parse(cli.ip.as_deref(), cli.user_agent.as_deref())?;

    // Classification needs no stores.
    let command = match cli.command {
        Commands::Classify { fields } => {
            print_classification(&fields);
            return Ok(ExitCode::SUCCESS);
        }
        command => command,
    };

    let cfg = load_config()?;
    tracing::debug!(data_dir = %cfg.data_dir().display(), "opening stores");
    let mediator = AccessMediator::open(&cfg)
        .with_context(|| format!("opening data directory {}", cfg.data_dir().display()))?;

    run(&mediator, command, &context)
}

fn load_config() -> anyhow::Result<CoreConfig> {
    let data_dir = data_dir_from_env_value(std::env::var("PIPA_DATA_DIR").ok());
    let policy_file = std::env::var("PIPA_POLICY_FILE")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from);
    let policy = load_policy(policy_file.as_deref())
        .with_context(|| format!("loading access policy from {policy_file:?}"))?;
    Ok(CoreConfig::new(data_dir, policy)?)
}

fn run(
    mediator: &AccessMediator,
    command: Commands,
    context: &AccessContext,
) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Register { who, values } => {
            let values: FieldValues = values.into_iter().collect();
            let id = mediator.register_patient(&who.actor(), who.purpose, values, context)?;
            println!("{id}");
        }
        Commands::Grant {
            patient_id,
            purpose,
            granted_by,
            expires_at,
        } => {
            let record = mediator.grant(&patient_id, purpose, &granted_by, expires_at, context)?;
            println!("{}", record.id);
        }
        Commands::Withdraw { consent_id, actor } => {
            match mediator.withdraw(&consent_id, &actor, context)? {
                WithdrawOutcome::Withdrawn(_) => println!("withdrawn {consent_id}"),
                WithdrawOutcome::AlreadyWithdrawn(_) => {
                    println!("{consent_id} was already withdrawn")
                }
            }
        }
        Commands::Authorize {
            patient_id,
            who,
            operation,
            fields,
        } => {
            let fields: FieldSet = fields.into_iter().collect();
            let decision = mediator.authorize_with_context(
                &who.actor(),
                &patient_id,
                operation.into(),
                who.purpose,
                &fields,
                context,
            );
            match decision {
                Decision::Allowed => println!("ALLOWED"),
                Decision::Denied(reason) => {
                    println!("DENIED {}", serde_json::to_string(&reason)?.trim_matches('"'));
                    return Ok(ExitCode::from(2));
                }
            }
        }
        Commands::Read {
            patient_id,
            who,
            fields,
        } => {
            let fields: FieldSet = fields.into_iter().collect();
            let values =
                mediator.read_fields(&who.actor(), &patient_id, who.purpose, &fields, context)?;
            println!("{}", serde_json::to_string_pretty(&values)?);
        }
        Commands::Write {
            patient_id,
            who,
            values,
        } => {
            let values: FieldValues = values.into_iter().collect();
            let count = values.len();
            mediator.write_fields(&who.actor(), &patient_id, who.purpose, values, context)?;
            println!("updated {count} field(s) on {patient_id}");
        }
        Commands::Consents { patient_id } => {
            let now = mediator.now();
            for record in mediator.consent_history(&patient_id)? {
                let status = if record.withdrawn_at.is_some() {
                    "withdrawn"
                } else if record.is_active_at(now) {
                    "active"
                } else {
                    "expired"
                };
                let expires = record
                    .expires_at
                    .map(|e| e.to_rfc3339())
                    .unwrap_or_else(|| "never".into());
                println!(
                    "{}  {:<9}  {:<9}  granted {}  expires {}",
                    record.id,
                    record.purpose,
                    status,
                    record.granted_at.to_rfc3339(),
                    expires
                );
            }
        }
        Commands::Audit {
            action,
            actor,
            resource,
            patient,
            since,
            until,
            limit,
        } => {
            let filter = AuditFilter {
                action,
                actor_id: actor,
                resource_id: resource,
                patient_id: patient,
                since,
                until,
                limit,
            };
            for entry in mediator.audit_log(&filter)? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        Commands::Classify { fields } => print_classification(&fields),
    }

    Ok(ExitCode::SUCCESS)
}

fn print_classification(fields: &[FieldName]) {
    let classifier = FieldClassifier::new();
    for field in fields {
        let label = match classifier.classify(field) {
            Sensitivity::Sensitive => "sensitive",
            Sensitivity::NonSensitive => "non-sensitive",
        };
        println!("{field}: {label}");
    }
}

/// Parses `name=value`. The value is read as JSON when it parses as JSON, otherwise as text.
fn parse_field_value(s: &str) -> Result<(FieldName, serde_json::Value), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{s}'"))?;
    let name = FieldName::new(name.trim()).map_err(|e| e.to_string())?;
    let value =
        serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.into()));
    Ok((name, value))
}
