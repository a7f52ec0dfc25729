use std::{collections::HashSet, path::Path};

use super::{Chip8, Chip8Error, Chip8Result, LoadError};
use crate::u4;

const TIMER_HZ: f32 = 60.0;
const TIMER_TIME_STEP: f32 = 1.0 / TIMER_HZ;

/// How many instructions run per 60Hz frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Speed {
    Slow,
    #[default]
    Normal,
    Fast,
    Fastest,
}

impl Speed {
    pub fn steps_per_tick(self) -> u32 {
        match self {
            Speed::Slow => 2,
            Speed::Normal => 5,
            Speed::Fast => 10,
            Speed::Fastest => 20,
        }
    }

    /// The next faster preset, wrapping from `Fastest` back to `Slow`.
    pub fn next(self) -> Speed {
        match self {
            Speed::Slow => Speed::Normal,
            Speed::Normal => Speed::Fast,
            Speed::Fast => Speed::Fastest,
            Speed::Fastest => Speed::Slow,
        }
    }
}

/// High-level emulator runner that manages timing internally.
pub struct Chip8Runner {
    chip8: Chip8,
    speed: Speed,
    paused: bool,
    timer_dt_accumulator: f32,
    /// Outcome of the most recent successful step.
    last_step: Chip8Result,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RunnerResult {
    HitBreakpoint,
    Ok,
}

impl Chip8Runner {
    pub fn new(chip8: Chip8, speed: Speed) -> Self {
        Self {
            chip8,
            speed,
            paused: false,
            timer_dt_accumulator: 0.0,
            last_step: Chip8Result::Continue,
        }
    }

    /// Update emulator by delta time.
    ///
    /// Every full 1/60s that has elapsed becomes one frame: `speed` CPU steps
    /// followed by a single timer tick.
    pub fn update(&mut self, dt: f32) -> Result<RunnerResult, Chip8Error> {
        self.update_with_breakpoints(dt, None)
    }

    /// Like `update` but checks for breakpoints after each CPU cycle.
    pub fn update_with_breakpoints(
        &mut self,
        dt: f32,
        breakpoints: Option<&HashSet<u16>>,
    ) -> Result<RunnerResult, Chip8Error> {
        if self.paused {
            return Ok(RunnerResult::Ok);
        }

        self.timer_dt_accumulator += dt;

        while self.timer_dt_accumulator >= TIMER_TIME_STEP {
            self.timer_dt_accumulator -= TIMER_TIME_STEP;

            if let Err(e) = self.run_frame(breakpoints) {
                // Don't try to catch up on a broken program
                self.timer_dt_accumulator = 0.0;
                return Err(e);
            }

            if let Some(breakpoints) = breakpoints
                && breakpoints.contains(&self.chip8.pc())
            {
                self.timer_dt_accumulator = 0.0;
                return Ok(RunnerResult::HitBreakpoint);
            }
        }

        Ok(RunnerResult::Ok)
    }

    /// Runs one frame worth of steps and ticks the timers.
    ///
    /// Stops early, without ticking, if PC lands on a breakpoint.
    fn run_frame(&mut self, breakpoints: Option<&HashSet<u16>>) -> Result<(), Chip8Error> {
        for _ in 0..self.speed.steps_per_tick() {
            self.step()?;

            if let Some(breakpoints) = breakpoints
                && breakpoints.contains(&self.chip8.pc())
            {
                return Ok(());
            }
        }

        self.chip8.tick();
        Ok(())
    }

    /// Loads a new image into the VM and forgets any pending key wait.
    pub fn load(&mut self, rom: &[u8]) -> Result<(), LoadError> {
        self.chip8.load(rom)?;
        self.restart_clock();
        Ok(())
    }

    /// Like `load`, reading the image from `path`.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        self.chip8.load_file(path)?;
        self.restart_clock();
        Ok(())
    }

    fn restart_clock(&mut self) {
        self.last_step = Chip8Result::Continue;
        self.timer_dt_accumulator = 0.0;
    }

    /// Executes a single instruction outside the frame clock.
    pub fn step(&mut self) -> Result<Chip8Result, Chip8Error> {
        let result = self.chip8.step()?;
        self.last_step = result;
        Ok(result)
    }

    /// True while the program is blocked in Fx0A with no key down.
    pub fn is_waiting_for_key(&self) -> bool {
        self.last_step == Chip8Result::WaitingForKey
    }

    pub fn speed(&self) -> Speed {
        self.speed
    }

    pub fn set_speed(&mut self, speed: Speed) {
        self.speed = speed;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
        // Time spent paused doesn't count
        self.timer_dt_accumulator = 0.0;
    }

    pub fn toggle_pause(&mut self) {
        if self.paused {
            self.resume();
        } else {
            self.pause();
        }
    }

    /// Returns true if the sound timer is active, indicating a beep should be played.
    pub fn sound_active(&self) -> bool {
        self.chip8.sound_active()
    }

    /// Set the state of a key on the keypad.
    pub fn set_key(&mut self, key: u4, pressed: bool) {
        self.chip8.set_key(key, pressed)
    }

    pub fn chip8_ref(&self) -> &Chip8 {
        &self.chip8
    }

    pub fn chip8_mut(&mut self) -> &mut Chip8 {
        &mut self.chip8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner_with(program: &[u16], speed: Speed) -> Chip8Runner {
        let rom: Vec<u8> = program.iter().flat_map(|op| op.to_be_bytes()).collect();
        let mut chip8 = Chip8::with_seed(0);
        chip8.load(&rom).unwrap();
        Chip8Runner::new(chip8, speed)
    }

    // 7001 repeated: V0 counts executed steps
    fn counting_program() -> Vec<u16> {
        vec![0x7001; 64]
    }

    #[test]
    fn one_frame_runs_speed_steps_and_one_tick() {
        let mut runner = runner_with(&counting_program(), Speed::Normal);
        runner.chip8_mut().delay_timer = 10;

        let result = runner.update(TIMER_TIME_STEP * 1.01).unwrap();

        assert_eq!(result, RunnerResult::Ok);
        assert_eq!(runner.chip8_ref().v()[0], 5);
        assert_eq!(runner.chip8_ref().delay_timer(), 9);
    }

    #[test]
    fn partial_frame_does_nothing_until_complete() {
        let mut runner = runner_with(&counting_program(), Speed::Fast);

        runner.update(TIMER_TIME_STEP * 0.6).unwrap();
        assert_eq!(runner.chip8_ref().v()[0], 0);

        runner.update(TIMER_TIME_STEP * 0.6).unwrap();
        assert_eq!(runner.chip8_ref().v()[0], 10);
    }

    #[test]
    fn speed_presets() {
        assert_eq!(Speed::Slow.steps_per_tick(), 2);
        assert_eq!(Speed::Normal.steps_per_tick(), 5);
        assert_eq!(Speed::Fast.steps_per_tick(), 10);
        assert_eq!(Speed::Fastest.steps_per_tick(), 20);
        assert_eq!(Speed::default(), Speed::Normal);
    }

    #[test]
    fn speed_cycles_through_presets() {
        let mut speed = Speed::Slow;
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(speed.steps_per_tick());
            speed = speed.next();
        }

        assert_eq!(seen, vec![2, 5, 10, 20, 2]);
    }

    #[test]
    fn tracks_wait_for_key_until_pressed() {
        // LD V0 K, then JP 202
        let mut runner = runner_with(&[0xF00A, 0x1202], Speed::Normal);
        assert!(!runner.is_waiting_for_key());

        runner.update(TIMER_TIME_STEP * 1.01).unwrap();
        assert!(runner.is_waiting_for_key());
        assert_eq!(runner.chip8_ref().pc(), 0x200);

        runner.set_key(u4::new(0xB), true);
        assert_eq!(runner.step().unwrap(), Chip8Result::Continue);
        assert!(!runner.is_waiting_for_key());
        assert_eq!(runner.chip8_ref().v()[0], 0xB);
    }

    #[test]
    fn load_clears_key_wait() {
        let mut runner = runner_with(&[0xF00A], Speed::Normal);
        runner.step().unwrap();
        assert!(runner.is_waiting_for_key());

        runner.load(&[0x60, 0x01]).unwrap();
        assert!(!runner.is_waiting_for_key());
        assert_eq!(runner.chip8_ref().pc(), 0x200);
    }

    #[test]
    fn paused_runner_ignores_time() {
        let mut runner = runner_with(&counting_program(), Speed::Slow);
        runner.pause();

        runner.update(1.0).unwrap();
        assert_eq!(runner.chip8_ref().v()[0], 0);

        runner.toggle_pause();
        assert!(!runner.is_paused());
        runner.update(TIMER_TIME_STEP * 1.01).unwrap();
        assert_eq!(runner.chip8_ref().v()[0], 2);
    }

    #[test]
    fn breakpoint_stops_mid_frame() {
        let mut runner = runner_with(&counting_program(), Speed::Fastest);
        let breakpoints = HashSet::from([0x206]);

        let result = runner
            .update_with_breakpoints(TIMER_TIME_STEP * 3.5, Some(&breakpoints))
            .unwrap();

        assert_eq!(result, RunnerResult::HitBreakpoint);
        assert_eq!(runner.chip8_ref().pc(), 0x206);
        assert_eq!(runner.chip8_ref().v()[0], 3);
    }

    #[test]
    fn engine_errors_are_reported() {
        let mut runner = runner_with(&[0x00EE], Speed::Normal);
        let err = runner.update(TIMER_TIME_STEP * 1.01).unwrap_err();

        assert_eq!(err, Chip8Error::StackUnderflow { pc: 0x200 });
    }
}
