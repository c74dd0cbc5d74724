use super::identity::{signup_email, vu_member_index, Identity, Member};
use super::MEMBERS_PATH;
use stampede_core::HttpConfig;
use stampede_engine::{async_trait, IterationContext, Scenario, SetupContext};
use stampede_http::{HttpClient, HttpResult, RequestSpec, SeedSource};
use std::time::Duration;

const SEED_TIMEOUT: Duration = Duration::from_secs(30);
const BURST_TIMEOUT: Duration = Duration::from_secs(5);

/// Signups with no think time, meant for a large constant VU count.
pub struct BurstScenario {
    client: HttpClient,
    seed: SeedSource,
}

impl BurstScenario {
    pub fn new(http: &HttpConfig) -> HttpResult<Self> {
        let client = HttpClient::new(http)?;
        let seed = SeedSource::new(&client, http.seed_base_url(), SEED_TIMEOUT)?;
        Ok(Self { client, seed })
    }
}

#[async_trait]
impl Scenario for BurstScenario {
    type Setup = Vec<Member>;

    fn name(&self) -> &str {
        "burst"
    }

    async fn setup(&self, ctx: &SetupContext) -> anyhow::Result<Vec<Member>> {
        Ok(self
            .seed
            .fetch_list(ctx, RequestSpec::get(MEMBERS_PATH).name("Setup_GetMembers"))
            .await)
    }

    fn is_setup_empty(&self, members: &Vec<Member>) -> bool {
        members.is_empty()
    }

    async fn iteration(&self, ctx: &mut IterationContext<Vec<Member>>) -> anyhow::Result<()> {
        let members = ctx.setup_data().clone();
        let Some(members) = members.get() else {
            return Ok(());
        };
        let member = &members[vu_member_index(ctx.vu_id(), members.len())];
        let identity = Identity::from_member(member, signup_email(member.name.as_deref()));

        let response = self
            .client
            .send(
                &*ctx,
                RequestSpec::post("/auth/join")
                    .name("BurstAttackWithRealData")
                    .timeout(BURST_TIMEOUT)
                    .json(identity.signup_payload()),
            )
            .await;

        ctx.checks(&response)
            .that("burst request succeeded", |r| r.status == 200)
            .that("no timeout", |r| !r.is_transport_error())
            .finish();
        Ok(())
    }
}
