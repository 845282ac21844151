//! Endgame tablebase probing on a long-lived engine.

use parley_harness::{HarnessError, SuiteContext, SuiteKind, TestCase, TestSuite};
use parley_pilot::ProcessSession;

use super::{send_all, EngineSlot, SuiteSettings};

/// A tablebase win reported as a score.
const TB_WIN: &str = "score cp 20000";
const TB_LOSS: &str = "score cp -20000";

pub struct TablebaseSuite {
    settings: SuiteSettings,
    engine: EngineSlot,
}

impl TablebaseSuite {
    pub fn new(settings: SuiteSettings) -> Self {
        Self {
            settings,
            engine: EngineSlot::default(),
        }
    }

    fn setup(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        let tablebase = self.settings.tablebase.as_ref().ok_or_else(|| {
            HarnessError::Other("tablebase suite registered without a tablebase directory".into())
        })?;
        let found = tablebase.found_message();
        let path = tablebase.path.display().to_string();

        let engine = self.engine.get()?;
        ctx.expect(engine).starts_with(&self.settings.engine_name)?;
        send_all(engine, &["uci", &format!("setoption name SyzygyPath value {path}")])?;
        ctx.expect(engine).wildcard(&found)?;
        Ok(())
    }

    fn bench(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        let engine = self.engine.get()?;
        ctx.expect(engine)
            .send("bench 128 1 8 default depth")?
            .wildcard("Nodes searched  :*")?;
        Ok(())
    }

    /// Search `fen` to depth 5 and require a tablebase score.
    fn probe(&mut self, ctx: &SuiteContext, fen: &str, score: &str) -> Result<(), HarnessError> {
        let engine = self.engine.get()?;
        send_all(engine, &["ucinewgame", &format!("position fen {fen}"), "go depth 5"])?;
        ctx.expect(engine)
            .callback(|line| Ok(line.contains(score) || line.contains("score mate")))?
            .wildcard("bestmove *")?;
        Ok(())
    }
}

impl TestSuite for TablebaseSuite {
    const NAME: &'static str = "tablebase";
    const KIND: SuiteKind = SuiteKind::Stateful;

    fn cases() -> Vec<TestCase<Self>> {
        vec![
            TestCase::new("syzygy_setup", Self::setup),
            TestCase::new("syzygy_bench", Self::bench),
            TestCase::new("syzygy_position", |s, ctx| {
                s.probe(ctx, "4k3/PP6/8/8/8/8/8/4K3 w - - 0 1", TB_WIN)
            }),
            TestCase::new("syzygy_position_2", |s, ctx| {
                s.probe(ctx, "8/1P6/2B5/8/4K3/8/6k1/8 w - - 0 1", TB_WIN)
            }),
            TestCase::new("syzygy_position_3", |s, ctx| {
                s.probe(ctx, "8/1P6/2B5/8/4K3/8/6k1/8 b - - 0 1", TB_LOSS)
            }),
        ]
    }

    fn before_all(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        self.engine.start(ctx)
    }

    fn after_all(&mut self, _ctx: &SuiteContext) -> Result<(), HarnessError> {
        self.engine.shutdown()
    }

    fn session(&mut self) -> Option<&mut ProcessSession> {
        self.engine.session()
    }
}
