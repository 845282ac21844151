//! A long-lived engine driven over stdin: handshake, options, searches on
//! fixed positions and mate detection.

use parley_harness::{
    ensure, require_success, DiagnosticScanner, HarnessError, SuiteContext, SuiteKind, TestCase,
    TestSuite,
};
use parley_pilot::ProcessSession;

use super::{info_line_pattern, send_all, EngineSlot, SuiteSettings, EXPORTED_NETWORK};

/// Black to move in a bare king and rook ending.
const FEN_KING_ROOK: &str = "5rk1/1K4p1/8/8/3B4/8/8/8 b - - 0 1";
/// White mates in one with an en passant capture.
const FEN_MATE_1: &str = "5K2/8/2qk4/2nPp3/3r4/6B1/B7/3R4 w - e6";
/// Black is mated in one.
const FEN_MATED_IN_1: &str = "2brrb2/8/p7/Q7/1p1kpPp1/1P1pN1K1/3P4/8 b - -";
const FEN_PAWN_STORM: &str = "5K2/8/2P1P1Pk/6pP/3p2P1/1P6/3P4/8 w - - 0 1";
/// White mates in two after c6d7.
const FEN_MATE_2: &str = "8/5R2/2K1P3/4k3/8/b1PPpp1B/5p2/8 w - -";
/// Black is mated in two, found only by a deep search.
const FEN_DEEP_MATE: &str = "1NR2B2/5p2/5p2/1p1kpp2/1P2rp2/2P1pB2/2P1P1K1/8 b - -";

pub struct InteractiveSuite {
    settings: SuiteSettings,
    engine: EngineSlot,
}

impl InteractiveSuite {
    pub fn new(settings: SuiteSettings) -> Self {
        Self {
            settings,
            engine: EngineSlot::default(),
        }
    }

    /// `ucinewgame`, the position, then a `go` command.
    fn search(&mut self, position: &str, go: &str) -> Result<&mut ProcessSession, HarnessError> {
        let engine = self.engine.get()?;
        send_all(engine, &["ucinewgame", &format!("position {position}"), go])?;
        Ok(engine)
    }

    fn startpos_nodes(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        let engine = self.search("startpos", "go nodes 1000")?;
        ctx.expect(engine).starts_with("bestmove")?;
        Ok(())
    }

    fn startpos_moves(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        let engine = self.search("startpos moves e2e4 e7e6", "go nodes 1000")?;
        ctx.expect(engine).starts_with("bestmove")?;
        Ok(())
    }

    fn fen_position(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        let engine = self.search(&format!("fen {FEN_KING_ROOK}"), "go nodes 1000")?;
        ctx.expect(engine).starts_with("bestmove")?;
        Ok(())
    }

    fn fen_position_flip(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        let engine = self.engine.get()?;
        send_all(
            engine,
            &["ucinewgame", &format!("position fen {FEN_KING_ROOK}"), "flip", "go nodes 1000"],
        )?;
        ctx.expect(engine).starts_with("bestmove")?;
        Ok(())
    }

    /// Every `info depth` line of a depth 5 search is well formed.
    fn depth_5_with_callback(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        let pattern = info_line_pattern(None, false)?;
        let engine = self.search("startpos", "go depth 5")?;
        ctx.expect(engine).callback(|line| {
            if line.starts_with("info depth") {
                ensure!(pattern.is_match(line), "malformed info line {line:?}");
            }
            Ok(line.starts_with("bestmove"))
        })?;
        Ok(())
    }

    /// With WDL enabled, depths 1 through 9 are reported in order.
    fn depth_9_with_wdl(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        let engine = self.engine.get()?;
        send_all(
            engine,
            &[
                "ucinewgame",
                "setoption name UCI_ShowWDL value true",
                "position startpos",
                "go depth 9",
            ],
        )?;

        let mut depth = 1;
        ctx.expect(engine).callback(|line| {
            if line.starts_with("info depth") {
                let pattern = info_line_pattern(Some(depth), true)?;
                ensure!(pattern.is_match(line), "expected depth {depth} with WDL, got {line:?}");
                depth += 1;
            }
            if line.starts_with("bestmove") {
                ensure!(depth == 10, "search stopped after depth {}", depth - 1);
                return Ok(true);
            }
            Ok(false)
        })?;
        Ok(())
    }

    fn mate_1(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        let engine = self.search(&format!("fen {FEN_MATE_1}"), "go depth 18")?;
        ctx.expect(engine)
            .wildcard("* score mate 1 * pv d5e6")?
            .equals("bestmove d5e6")?;
        Ok(())
    }

    fn mated_in_1(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        let engine = self.search(&format!("fen {FEN_MATED_IN_1}"), "go depth 18")?;
        ctx.expect(engine)
            .wildcard("* score mate -1 *")?
            .starts_with("bestmove")?;
        Ok(())
    }

    fn fixed_nodes(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        let engine = self.search(&format!("fen {FEN_PAWN_STORM}"), "go nodes 500000")?;
        ctx.expect(engine).starts_with("bestmove")?;
        Ok(())
    }

    /// Search the mate-in-two position and check the principal variation.
    fn mate_2(
        &mut self,
        ctx: &SuiteContext,
        moves: &str,
        go: &str,
        pattern: &str,
        bestmove: &str,
    ) -> Result<(), HarnessError> {
        let engine = self.search(&format!("fen {FEN_MATE_2}{moves}"), go)?;
        ctx.expect(engine).wildcard(pattern)?.starts_with(bestmove)?;
        Ok(())
    }

    fn deep_search(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        let engine = self.search(&format!("fen {FEN_DEEP_MATE}"), "go depth 27")?;
        ctx.expect(engine)
            .contains("score mate -2")?
            .starts_with("bestmove")?;
        Ok(())
    }

    /// Export the network with a one-shot run, then load it into the live
    /// engine.
    fn verify_nnue(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        let target = ctx.workdir().join(EXPORTED_NETWORK);
        let target = target.to_string_lossy().into_owned();
        let export = ctx.one_shot(&["export_net", &target])?;
        require_success(&export)?;
        DiagnosticScanner::from_config(ctx.config()).check(&export.output())?;

        let engine = self.engine.get()?;
        send_all(
            engine,
            &[
                &format!("setoption name EvalFile value {EXPORTED_NETWORK}"),
                "position startpos",
                "go depth 5",
            ],
        )?;
        ctx.expect(engine).starts_with("bestmove")?;
        Ok(())
    }

    fn option_then_search(
        &mut self,
        ctx: &SuiteContext,
        option: &str,
    ) -> Result<&mut ProcessSession, HarnessError> {
        let engine = self.engine.get()?;
        send_all(engine, &[option, "position startpos", "go depth 5"])?;
        ctx.expect(engine).starts_with("bestmove")?;
        Ok(engine)
    }
}

impl TestSuite for InteractiveSuite {
    const NAME: &'static str = "interactive";
    const KIND: SuiteKind = SuiteKind::Stateful;

    fn cases() -> Vec<TestCase<Self>> {
        vec![
            TestCase::new("startup_output", |s, ctx| {
                ctx.expect(s.engine.get()?)
                    .starts_with(&s.settings.engine_name)?;
                Ok(())
            }),
            TestCase::new("uci_command", |s, ctx| {
                ctx.expect(s.engine.get()?).send("uci")?.equals("uciok")?;
                Ok(())
            }),
            TestCase::new("set_threads_option", |s, ctx| {
                let threads = ctx.target().threads();
                s.engine
                    .get()?
                    .send_command(&format!("setoption name Threads value {threads}"))?;
                Ok(())
            }),
            TestCase::new("ucinewgame_and_startpos_nodes_1000", Self::startpos_nodes),
            TestCase::new("ucinewgame_and_startpos_moves", Self::startpos_moves),
            TestCase::new("fen_position_1", Self::fen_position),
            TestCase::new("fen_position_2_flip", Self::fen_position_flip),
            TestCase::new("depth_5_with_callback", Self::depth_5_with_callback),
            TestCase::new("ucinewgame_and_go_depth_9", Self::depth_9_with_wdl),
            TestCase::new("clear_hash", |s, _| {
                s.engine.get()?.send_command("setoption name Clear Hash")?;
                Ok(())
            }),
            TestCase::new("fen_position_mate_1", Self::mate_1),
            TestCase::new("fen_position_mate_minus_1", Self::mated_in_1),
            TestCase::new("fen_position_fixed_node", Self::fixed_nodes),
            TestCase::new("fen_position_with_mate_go_depth", |s, ctx| {
                s.mate_2(ctx, "", "go depth 18 searchmoves c6d7", "* score mate 2 * pv c6d7 * f7f5", "bestmove")
            }),
            TestCase::new("fen_position_with_mate_go_mate", |s, ctx| {
                s.mate_2(ctx, "", "go mate 2 searchmoves c6d7", "* score mate 2 * pv c6d7 *", "bestmove")
            }),
            TestCase::new("fen_position_with_mate_go_nodes", |s, ctx| {
                s.mate_2(ctx, "", "go nodes 500000 searchmoves c6d7", "* score mate 2 * pv c6d7 * f7f5", "bestmove")
            }),
            TestCase::new("fen_position_depth_27", Self::deep_search),
            TestCase::new("fen_position_with_mate_go_depth_and_promotion", |s, ctx| {
                s.mate_2(ctx, " moves c6d7 f2f1q", "go depth 18", "* score mate 1 * pv f7f5", "bestmove f7f5")
            }),
            TestCase::new("fen_position_with_mate_go_depth_and_searchmoves", |s, ctx| {
                s.mate_2(ctx, "", "go depth 18 searchmoves c6d7", "* score mate 2 * pv c6d7 * f7f5", "bestmove c6d7")
            }),
            TestCase::new("fen_position_with_moves_with_mate_go_depth_and_searchmoves", |s, ctx| {
                s.mate_2(ctx, " moves c6d7", "go depth 18 searchmoves e3e2", "* score mate -1 * pv e3e2 f7f5", "bestmove e3e2")
            }),
            TestCase::new("verify_nnue_network", Self::verify_nnue),
            TestCase::new("multipv_setting", |s, ctx| {
                s.option_then_search(ctx, "setoption name MultiPV value 4")?;
                Ok(())
            }),
            TestCase::new("fen_position_with_skill_level", |s, ctx| {
                let engine = s.option_then_search(ctx, "setoption name Skill Level value 10")?;
                engine.send_command("setoption name Skill Level value 20")?;
                Ok(())
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
