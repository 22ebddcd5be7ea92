//! Binds, the root DSE and out-of-band searches.

use secrecy::SecretString;

use super::{CatalogOptions, own_dn, refused};
use crate::directory::{Diagnostic, OpOutcome, rc};
use crate::dn::{Dn, Rdn};
use crate::entry::Attributes;
use crate::error::{CaseResult, ConformError, ensure};
use crate::filter::Filter;
use crate::fixture::generate_secret;
use crate::matrix::{Expectation, ExpectationMatrix, hook};
use crate::principal::{Credential, roles};
use crate::probe::{ProbeOutcome, ProbeRequest};
use crate::runner::{CaseContext, Operation, OperationKind, Scenario};

/// Suite name.
pub const SUITE: &str = "connection";

/// Lock stamp meaning "locked until an administrator unlocks".
const PERMANENT_LOCK: &str = "000001010000Z";

/// Scenarios of this suite. Probe scenarios are left out when the
/// out-of-band tool is disabled.
#[must_use]
pub fn scenarios(options: CatalogOptions) -> Vec<Scenario> {
    let mut scenarios = vec![
        bind(),
        bind_wrong_secret(),
        bind_unknown_identity(),
        server_info(),
        bind_without_secret(),
        bind_locked_account(),
    ];
    if options.probe {
        scenarios.push(probe_people_subtree());
        scenarios.push(probe_own_entry());
    }
    scenarios
}

fn only(id: &str, expectation: Expectation) -> ExpectationMatrix {
    ExpectationMatrix::uniform(roles::ALL, Expectation::Skip).set([id], expectation)
}

/// Binds `credential` on a fresh channel and returns the bind outcome.
fn bind_as(ctx: &CaseContext<'_>, credential: &Credential) -> CaseResult<OpOutcome> {
    let session = ctx.open_session(credential)?;
    let outcome = session.bind_outcome().clone();
    session.release()?;
    Ok(outcome)
}

fn bind() -> Scenario {
    Scenario::new(
        SUITE,
        "bind",
        Operation::new(OperationKind::Bind, "with the principal's credential", |ctx| {
            Ok(ctx.session().bind_outcome().clone())
        }),
        ExpectationMatrix::uniform(roles::ALL, Expectation::Succeed),
    )
    .describe("every principal, anonymous included, can open a session")
}

fn bind_wrong_secret() -> Scenario {
    Scenario::new(
        SUITE,
        "bind-wrong-secret",
        Operation::new(OperationKind::Bind, "with a wrong secret", |ctx| {
            let credential = ctx.principal().credential().with_secret(generate_secret());
            bind_as(ctx, &credential)
        }),
        refused().skip([roles::ANONYMOUS]),
    )
    .describe("a wrong secret never binds, root included")
}

fn bind_unknown_identity() -> Scenario {
    Scenario::new(
        SUITE,
        "bind-unknown-identity",
        Operation::new(OperationKind::Bind, "as cn=fake_username", |ctx| {
            let unknown = ctx.layout().base.child(Rdn::new("cn", "fake_username"));
            let credential = ctx.principal().credential().with_dn(unknown);
            bind_as(ctx, &credential)
        }),
        refused().skip([roles::ANONYMOUS]),
    )
    .describe("a valid secret does not bind an identity that does not exist")
}

fn server_info() -> Scenario {
    Scenario::new(
        SUITE,
        "server-info",
        Operation::new(OperationKind::RootDse, "naming contexts and versions", |ctx| {
            let info = ctx.session().root_dse()?;
            let data = ctx.data_mut();
            data.set_values("naming_contexts", info.naming_contexts);
            data.set_values("versions", info.supported_versions);
            Ok(Diagnostic::success().into())
        }),
        only(roles::ANONYMOUS, Expectation::Succeed),
    )
    .describe("the root DSE publishes the base DN and protocol version 3 only")
    .with_check(hook(|ctx| {
        let base = ctx.layout().base.clone();
        let contexts = ctx.data().values("naming_contexts")?;
        let first = contexts
            .first()
            .map(|first| Dn::parse(first))
            .transpose()
            .map_err(ConformError::from)?;
        ensure(first.as_ref() == Some(&base), || {
            format!("first naming context is {contexts:?}, expected {base}")
        })?;
        let versions = ctx.data().values("versions")?;
        ensure(versions == ["3"], || {
            format!("supported versions are {versions:?}, expected [\"3\"]")
        })
    }))
}

fn bind_without_secret() -> Scenario {
    Scenario::new(
        SUITE,
        "bind-without-secret",
        Operation::new(OperationKind::Bind, "as a person without password", |ctx| {
            let dn = ctx.data().dn("target")?.clone();
            bind_as(ctx, &Credential::without_secret(dn))
        }),
        only(roles::ADMIN, Expectation::Fail),
    )
    .describe("an identity without a password cannot authenticate")
    .with_setup(hook(|ctx| {
        let dn = ctx.fixtures().create_person_with(None, Attributes::new())?;
        ctx.data_mut().set_dn("target", dn);
        Ok(())
    }))
}

fn bind_locked_account() -> Scenario {
    Scenario::new(
        SUITE,
        "bind-locked-account",
        Operation::new(OperationKind::Bind, "as a locked person", |ctx| {
            let dn = ctx.data().dn("target")?.clone();
            let secret = ctx.data().secret("target")?.clone();
            bind_as(ctx, &Credential::simple(dn, secret))
        }),
        only(roles::ADMIN, Expectation::Fail),
    )
    .describe("a locked account cannot authenticate with its correct password")
    .with_setup(hook(|ctx| {
        let secret = generate_secret();
        let locked = Attributes::new().with("pwdAccountLockedTime", [PERMANENT_LOCK]);
        let dn = ctx.fixtures().create_person_with(Some(&secret), locked)?;
        let data = ctx.data_mut();
        data.set_dn("target", dn);
        data.set_secret("target", secret);
        Ok(())
    }))
}

// =============================================================================
// Out-of-band
// =============================================================================

fn probe_request(ctx: &CaseContext<'_>, base: Dn) -> ProbeRequest {
    let request = ProbeRequest::new(base, Filter::object_class("inetOrgPerson"))
        .with_attributes(["uid", "givenName"]);
    let credential = ctx.principal().credential();
    match (credential.dn(), credential.secret()) {
        (Some(dn), Some(secret)) => request.bind_as(dn.clone(), secret.clone()),
        (Some(dn), None) => request.bind_as(dn.clone(), SecretString::from(String::new())),
        _ => request,
    }
}

fn probe_outcome(program: &str, outcome: &ProbeOutcome) -> OpOutcome {
    if outcome.success {
        return Diagnostic::success().into();
    }
    let code = outcome
        .exit_code
        .and_then(|code| u32::try_from(code).ok())
        .filter(|code| *code != rc::SUCCESS)
        .unwrap_or(rc::OTHER);
    let mut message = match outcome.exit_code {
        Some(exit) => format!("{program} exited with {exit}"),
        None => format!("{program} was terminated by a signal"),
    };
    if !outcome.stderr.is_empty() {
        message.push_str(": ");
        message.push_str(&outcome.stderr);
    }
    Diagnostic::new(code, message).into()
}

fn run_probe(ctx: &CaseContext<'_>, base: Dn) -> CaseResult<OpOutcome> {
    let probe = ctx.probe()?;
    let outcome = probe.query(&probe_request(ctx, base))?;
    Ok(probe_outcome(probe.program(), &outcome))
}

fn probe_people_subtree() -> Scenario {
    Scenario::new(
        SUITE,
        "probe-people-subtree",
        Operation::new(OperationKind::Probe, "of the people subtree", |ctx| {
            let base = ctx.layout().people.clone();
            run_probe(ctx, base)
        }),
        super::search::people_readers(),
    )
    .describe("the command-line tool sees the people subtree exactly when a session does")
}

fn probe_own_entry() -> Scenario {
    Scenario::new(
        SUITE,
        "probe-own-entry",
        Operation::new(OperationKind::Probe, "of the principal's own entry", |ctx| {
            let base = own_dn(ctx)?;
            run_probe(ctx, base)
        }),
        ExpectationMatrix::uniform(roles::ALL, Expectation::Succeed)
            .skip([roles::ANONYMOUS, roles::ADMIN]),
    )
    .describe("every identity reads its own entry with the command-line tool")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_outcome_mapping() {
        let ok = probe_outcome("ldapsearch", &ProbeOutcome::exited(0));
        assert!(ok.success);

        let denied = probe_outcome("ldapsearch", &ProbeOutcome::exited(32));
        assert!(!denied.success);
        assert_eq!(denied.diagnostic.code, rc::NO_SUCH_OBJECT);
        assert!(denied.diagnostic.message.contains("exited with 32"));

        let killed = probe_outcome(
            "ldapsearch",
            &ProbeOutcome {
                exit_code: None,
                success: false,
                stderr: "ldap_sasl_bind(SIMPLE): Can't contact LDAP server".to_string(),
            },
        );
        assert_eq!(killed.diagnostic.code, rc::OTHER);
        assert!(killed.diagnostic.message.contains("Can't contact"));
    }

    #[test]
    fn test_root_only_scenarios_skip_everyone_else() {
        let scenario = bind_locked_account();
        assert_eq!(scenario.matrix().expectation(roles::ADMIN), Expectation::Fail);
        assert_eq!(scenario.matrix().succeeding().count(), 0);
        assert_eq!(scenario.matrix().expectation(roles::USER), Expectation::Skip);
    }
}
