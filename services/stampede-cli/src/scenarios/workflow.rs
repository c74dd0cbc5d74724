//! Full banking workflow per iteration:
//! signup, login, card registration, goal setting, goal scoring, report

use super::identity::{phone_digits, workflow_email, workflow_member_index, Account, Identity, Member};
use super::{record_step, Pace, MEMBERS_PATH};
use chrono::Local;
use serde_json::{json, Value};
use stampede_core::HttpConfig;
use stampede_engine::{async_trait, IterationContext, Scenario, SetupContext};
use stampede_http::{ExtractionChain, HttpClient, HttpResult, RequestSpec, SeedSource};
use std::time::Duration;
use tracing::{debug, info, warn};

const ACCOUNTS_PATH: &str = "/api/test/member-accounts";
const SEED_TIMEOUT: Duration = Duration::from_secs(120);
const ACCOUNTS_TIMEOUT: Duration = Duration::from_secs(30);
const STEP_TIMEOUT: Duration = Duration::from_secs(60);
const VERIFY_TIMEOUT: Duration = Duration::from_secs(30);
const SCORE_TIMEOUT: Duration = Duration::from_secs(120);

/// Member ids reserved for manual testing.
pub const DEFAULT_EXCLUDED_IDS: [i64; 7] = [28, 29, 30, 31, 32, 33, 34];

type Ctx = IterationContext<Vec<Member>>;

pub struct WorkflowScenario {
    client: HttpClient,
    seed: SeedSource,
    accounts: SeedSource,
    excluded_ids: Vec<i64>,
    token_chain: ExtractionChain<String>,
    pace: Pace,
}

impl WorkflowScenario {
    pub fn new(http: &HttpConfig) -> HttpResult<Self> {
        let client = HttpClient::new(http)?;
        let seed = SeedSource::new(&client, http.seed_base_url(), SEED_TIMEOUT)?;
        let accounts = seed.clone().with_timeout(ACCOUNTS_TIMEOUT);
        Ok(Self {
            client,
            seed,
            accounts,
            excluded_ids: DEFAULT_EXCLUDED_IDS.to_vec(),
            token_chain: ExtractionChain::new().pointer("/resultData/tokens/accessToken"),
            pace: Pace::default(),
        })
    }

    pub fn with_excluded_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.excluded_ids = ids.into_iter().collect();
        self
    }

    pub fn with_pace(mut self, pace: Pace) -> Self {
        self.pace = pace;
        self
    }

    fn is_excluded(&self, member: &Member) -> bool {
        member.id.map(|id| self.excluded_ids.contains(&id)).unwrap_or(false)
    }

    /// Drop excluded members, then keep only those with account credentials
    /// unless none have them.
    pub fn select_members(&self, members: Vec<Member>) -> Vec<Member> {
        let eligible: Vec<Member> = members.into_iter().filter(|m| !self.is_excluded(m)).collect();
        let with_account: Vec<Member> = eligible.iter().filter(|m| m.has_account()).cloned().collect();
        if with_account.is_empty() {
            if !eligible.is_empty() {
                warn!(members = eligible.len(), "No member has account credentials; using all eligible members");
            }
            eligible
        } else {
            with_account
        }
    }

    async fn think(&self, ctx: &Ctx, seconds: f64) {
        ctx.sleep(self.pace.think(Duration::from_secs_f64(seconds))).await;
    }

    /// Register every account of the member as a card, then compare against
    /// the card list the service reports.
    async fn register_cards(&self, ctx: &mut Ctx, member: &Member, name: &str, token: &str) {
        let accounts: Vec<Account> = self
            .accounts
            .fetch_list(
                &*ctx,
                RequestSpec::get(ACCOUNTS_PATH)
                    .query("memberName", name)
                    .name("FetchCardInfo"),
            )
            .await;

        if accounts.is_empty() {
            debug!(vu_id = ctx.vu_id(), member = name, "No accounts; skipping card registration");
            self.think(ctx, 1.0).await;
            return;
        }

        let (regist_front, regist_back) = member.card_registration_parts();

        let mut registered = 0;
        for (idx, account) in accounts.iter().enumerate() {
            let payload = json!({
                "cardNum": account.account_number,
                "cardPw": account.account_password,
                "expiryMmYy": "1229",
                "cardUserRegistNum": regist_front,
                "cardUserRegistBack": regist_back,
                "cardCvc": "123",
                "cardAlias": format!("{}_계좌_{}", name, idx + 1),
            });
            let response = self
                .client
                .send(
                    &*ctx,
                    RequestSpec::patch("/test/card/putCard/no-cvc")
                        .name("CardRegistration")
                        .bearer(token)
                        .timeout(STEP_TIMEOUT)
                        .json(payload),
                )
                .await;

            let ok = ctx.check(&response, "card registered", |r| r.status == 200);
            record_step(&*ctx, ok);
            if ok {
                registered += 1;
            }
            self.think(ctx, 1.0).await;
        }

        let verify = self
            .client
            .send(
                &*ctx,
                RequestSpec::get("/card")
                    .name("VerifyCards")
                    .bearer(token)
                    .timeout(VERIFY_TIMEOUT),
            )
            .await;
        if verify.status == 200 {
            let actual = ExtractionChain::<Vec<Value>>::new()
                .array_at("/resultData")
                .extract_body(&verify.body)
                .map(|cards| cards.len())
                .unwrap_or(0);
            if actual != accounts.len() {
                warn!(
                    vu_id = ctx.vu_id(),
                    attempted = accounts.len(),
                    registered,
                    actual,
                    "Registered card count mismatch"
                );
            }
        }

        self.think(ctx, 0.5).await;
    }
}

#[async_trait]
impl Scenario for WorkflowScenario {
    type Setup = Vec<Member>;

    fn name(&self) -> &str {
        "workflow"
    }

    async fn setup(&self, ctx: &SetupContext) -> anyhow::Result<Vec<Member>> {
        let members: Vec<Member> = self
            .seed
            .fetch_list(ctx, RequestSpec::get(MEMBERS_PATH).name("Setup_GetMembers"))
            .await;
        let fetched = members.len();
        let selected = self.select_members(members);
        info!(fetched, selected = selected.len(), "Workflow members selected");
        Ok(selected)
    }

    fn is_setup_empty(&self, members: &Vec<Member>) -> bool {
        members.is_empty()
    }

    async fn iteration(&self, ctx: &mut Ctx) -> anyhow::Result<()> {
        let members = ctx.setup_data().clone();
        let Some(members) = members.get() else {
            return Ok(());
        };
        let member = &members[workflow_member_index(ctx.vu_id(), ctx.iteration(), members.len())];
        if self.is_excluded(member) {
            return Ok(());
        }

        let phone = phone_digits(member.phone.as_deref());
        let (Some(name), Some(_)) = (member.name.clone(), phone.as_ref()) else {
            debug!(vu_id = ctx.vu_id(), member_id = ?member.id, "Member lacks a name or phone");
            record_step(&*ctx, false);
            return Ok(());
        };
        let identity = Identity::from_member(member, workflow_email(Some(&name))).with_phone(phone);

        // Signup
        let signup = self
            .client
            .send(
                &*ctx,
                RequestSpec::post("/auth/join")
                    .name("Signup")
                    .timeout(STEP_TIMEOUT)
                    .json(identity.signup_payload()),
            )
            .await;
        let ok = ctx.check(&signup, "signup succeeded", |r| r.status == 200 || r.status == 201);
        record_step(&*ctx, ok);
        if !ok && signup.status == 400 {
            debug!(vu_id = ctx.vu_id(), email = %identity.email, "Signup rejected");
            return Ok(());
        }
        self.think(ctx, 1.0).await;

        // Login
        let login = self
            .client
            .send(
                &*ctx,
                RequestSpec::post("/auth/login")
                    .name("Login")
                    .timeout(STEP_TIMEOUT)
                    .json(identity.login_payload()),
            )
            .await;
        let ok = ctx.check(&login, "login succeeded", |r| r.status == 200);
        let token = if ok { self.token_chain.extract_body(&login.body) } else { None };
        record_step(&*ctx, token.is_some());
        let Some(token) = token else {
            debug!(vu_id = ctx.vu_id(), email = %identity.email, status = login.status, "No access token");
            return Ok(());
        };
        self.think(ctx, 1.0).await;

        // Cards
        self.register_cards(ctx, member, &name, &token).await;

        // Goal
        let goal_start = Local::now().format("%Y-%m-01").to_string();
        let goal = self
            .client
            .send(
                &*ctx,
                RequestSpec::put("/goal/setgoal")
                    .name("SetGoal")
                    .bearer(&token)
                    .timeout(STEP_TIMEOUT)
                    .json(json!({
                        "goalJob": "SALARY",
                        "goalStartDate": goal_start,
                        "goalIncome": "3000",
                        "previousGoalMoney": 200,
                        "essentialCategories": [],
                    })),
            )
            .await;
        let ok = ctx.check(&goal, "goal set", |r| r.status == 200);
        record_step(&*ctx, ok);
        self.think(ctx, 1.0).await;

        // Score calculation runs once per run
        if ctx.vu_id() == 1 && ctx.iteration() == 0 {
            let score = self
                .client
                .send(
                    &*ctx,
                    RequestSpec::get("/test/goal-score/calculate")
                        .name("CalculateGoalScore")
                        .bearer(&token)
                        .timeout(SCORE_TIMEOUT),
                )
                .await;
            let ok = ctx.check(&score, "goal score calculated", |r| r.status == 200);
            record_step(&*ctx, ok);
            self.think(ctx, 2.0).await;
        }

        // Report
        let report = self
            .client
            .send(
                &*ctx,
                RequestSpec::get("/goal/report")
                    .name("ReportCheck")
                    .bearer(&token)
                    .timeout(STEP_TIMEOUT),
            )
            .await;
        let ok = ctx.check(&report, "report retrieved", |r| r.status == 200);
        record_step(&*ctx, ok);
        self.think(ctx, 1.0).await;

        Ok(())
    }
}
