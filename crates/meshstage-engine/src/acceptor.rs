//! # Trust Acceptor
//!
//! Accepts pending grant invitations that pass the admission policy.
//! Rejected invitations stay pending; a later policy change can still
//! admit them.

use meshstage_core::{GrantStatus, InvocationOutcome};
use tracing::{debug, error, info, instrument, warn};

use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};

pub struct TrustAcceptor<'a> {
    ctx: &'a EngineContext,
}

impl<'a> TrustAcceptor<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        TrustAcceptor { ctx }
    }

    /// Accepts every admissible pending invitation.
    ///
    /// Processed ids are the ARNs of the accepted grants. Failing to list
    /// invitations is fatal; a failed accept only marks that invitation.
    #[instrument(skip(self))]
    pub async fn run(&self) -> EngineResult<InvocationOutcome> {
        let mut outcome = InvocationOutcome::new("accept_invitations");
        let local = self.ctx.local_account();

        let invitations = self.ctx.directory.list_invitations().await.map_err(|e| {
            error!(error = %e, "Failed to list invitations");
            EngineError::from(e)
        })?;

        let pending = invitations.into_iter().filter(|i| {
            i.status == GrantStatus::Pending
                && i.receiver_account.as_deref().map_or(true, |r| r == local)
        });

        for invitation in pending {
            let stage = match self
                .ctx
                .policy
                .admit(&invitation.sender_account, &invitation.grant_name)
            {
                Ok(stage) => stage,
                Err(skip) => {
                    info!(
                        grant = %invitation.grant_arn,
                        sender = %invitation.sender_account,
                        reason = %skip,
                        "Leaving invitation pending"
                    );
                    outcome.skip(invitation.grant_arn, skip);
                    continue;
                }
            };

            match self.ctx.directory.accept_invitation(&invitation.invitation_id).await {
                Ok(()) => {
                    info!(grant = %invitation.grant_arn, stage = %stage, "Accepted invitation");
                    outcome.processed(invitation.grant_arn);
                }
                Err(e) => {
                    warn!(grant = %invitation.grant_arn, error = %e, "Failed to accept invitation");
                    outcome.fail(invitation.grant_arn, e);
                }
            }
        }

        let outcome = outcome.finish();
        debug!(status = ?outcome.status, accepted = outcome.processed.len(), "Acceptance finished");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context_with, SENDER};
    use meshstage_core::{GrantInvitation, OutcomeStatus};

    #[tokio::test]
    async fn test_admission_rules() {
        let (ctx, fake) = context_with(|fake| {
            fake.invite("inv-ok", "beta", SENDER);
            fake.invite("inv-stranger", "beta", "777777777777");
            fake.invite("inv-unknown", "gamma", SENDER);
            fake.invite("inv-case", "Beta", SENDER);
        })
        .await;

        let outcome = TrustAcceptor::new(&ctx).run().await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Succeeded);
        assert_eq!(outcome.processed.len(), 1);
        assert_eq!(outcome.skipped.len(), 3);

        let statuses: Vec<(String, GrantStatus)> = fake
            .invitations()
            .into_iter()
            .map(|i| (i.invitation_id, i.status))
            .collect();
        assert!(statuses.contains(&("inv-ok".into(), GrantStatus::Active)));
        assert!(statuses.contains(&("inv-stranger".into(), GrantStatus::Pending)));
        assert!(statuses.contains(&("inv-case".into(), GrantStatus::Pending)));
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let (ctx, fake) = context_with(|fake| {
            fake.invite("inv-1", "alpha", SENDER);
        })
        .await;

        TrustAcceptor::new(&ctx).run().await.unwrap();
        let again = TrustAcceptor::new(&ctx).run().await.unwrap();
        assert_eq!(again.status, OutcomeStatus::NoOp);
        assert_eq!(fake.calls("accept_invitation"), 1);
    }

    #[tokio::test]
    async fn test_ignores_invitations_for_other_receivers() {
        let (ctx, fake) = context_with(|fake| {
            fake.add_invitation(GrantInvitation {
                invitation_id: "inv-elsewhere".into(),
                grant_arn: "arn:aws:ram:eu-west-1:444455556666:resource-share/x".into(),
                grant_name: "beta".into(),
                sender_account: SENDER.into(),
                receiver_account: Some("222222222222".into()),
                status: GrantStatus::Pending,
            });
        })
        .await;

        let outcome = TrustAcceptor::new(&ctx).run().await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::NoOp);
        assert_eq!(fake.calls("accept_invitation"), 0);
    }
}
