use super::identity::{signup_email, vu_member_index, Identity, Member};
use super::{record_step, Pace, MEMBERS_PATH};
use stampede_core::HttpConfig;
use stampede_engine::{async_trait, IterationContext, Scenario, SetupContext};
use stampede_http::{HttpClient, HttpResult, RequestSpec, SeedSource};
use std::time::Duration;
use tracing::debug;

const SEED_TIMEOUT: Duration = Duration::from_secs(30);
const SIGNUP_TIMEOUT: Duration = Duration::from_secs(30);
const SLOW_RESPONSE: Duration = Duration::from_secs(3);

/// Ramping signup stress: one registration per iteration, one second apart.
pub struct SignupScenario {
    client: HttpClient,
    seed: SeedSource,
    pace: Pace,
}

impl SignupScenario {
    pub fn new(http: &HttpConfig) -> HttpResult<Self> {
        let client = HttpClient::new(http)?;
        let seed = SeedSource::new(&client, http.seed_base_url(), SEED_TIMEOUT)?;
        Ok(Self {
            client,
            seed,
            pace: Pace::default(),
        })
    }

    pub fn with_pace(mut self, pace: Pace) -> Self {
        self.pace = pace;
        self
    }
}

#[async_trait]
impl Scenario for SignupScenario {
    type Setup = Vec<Member>;

    fn name(&self) -> &str {
        "signup"
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
                    .name("SignupWithRealData")
                    .timeout(SIGNUP_TIMEOUT)
                    .json(identity.signup_payload()),
            )
            .await;

        let ok = ctx
            .checks(&response)
            .that("signup succeeded", |r| r.status == 200)
            .that("response time < 3s", |r| r.duration < SLOW_RESPONSE)
            .that("response body present", |r| r.has_body())
            .finish();
        record_step(&*ctx, ok);
        if !ok {
            debug!(
                vu_id = ctx.vu_id(),
                email = %identity.email,
                status = response.status,
                "Signup failed"
            );
        }

        ctx.sleep(self.pace.think(Duration::from_secs(1))).await;
        Ok(())
    }
}
