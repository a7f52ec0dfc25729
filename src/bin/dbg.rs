use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::Context;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    DefaultTerminal, Frame,
    buffer::Buffer,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Paragraph, Widget, Wrap},
};

use chip8_vm::{
    Chip8Error, MEMORY_SIZE, Opcode, STACK_SIZE,
    debugger::{Cli, Command, CommandResult, Executor},
    emu::{Chip8, Chip8Runner, DISPLAY_X, DISPLAY_Y, RunnerResult, Speed},
    u4,
};

/// Terminal keys fed to the CHIP-8 keypad while the program runs.
const KEY_MAP: [KeyCode; 16] = [
    KeyCode::Char('x'), // 0x0
    KeyCode::Char('1'), // 0x1
    KeyCode::Char('2'), // 0x2
    KeyCode::Char('3'), // 0x3
    KeyCode::Char('q'), // 0x4
    KeyCode::Char('w'), // 0x5
    KeyCode::Char('e'), // 0x6
    KeyCode::Char('a'), // 0x7
    KeyCode::Char('s'), // 0x8
    KeyCode::Char('d'), // 0x9
    KeyCode::Char('z'), // 0xA
    KeyCode::Char('c'), // 0xB
    KeyCode::Char('4'), // 0xC
    KeyCode::Char('r'), // 0xD
    KeyCode::Char('f'), // 0xE
    KeyCode::Char('v'), // 0xF
];

/// Most terminals never report key releases, so a key counts as released
/// once this long has passed without a repeat.
const KEY_HOLD: Duration = Duration::from_millis(50);

const SIDE_WIDTH: u16 = 24;
const SCREEN_HEIGHT: u16 = DISPLAY_Y as u16 + 2;
const MIN_WIDTH: u16 = DISPLAY_X as u16 + 2 + SIDE_WIDTH;
const MIN_HEIGHT: u16 = SCREEN_HEIGHT + 5 + 3;

/// Instructions shown in the code panel before the current one.
const CODE_CONTEXT: u16 = 2;

/// What the program is doing, as shown in the status panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    Paused,
    WaitingForKey,
    Fault,
}

impl RunState {
    fn of(executor: &Executor) -> Self {
        if executor.fault().is_some() {
            RunState::Fault
        } else if executor.is_waiting_for_key() {
            RunState::WaitingForKey
        } else if executor.is_running() {
            RunState::Running
        } else {
            RunState::Paused
        }
    }

    fn label(self) -> &'static str {
        match self {
            RunState::Running => "RUNNING",
            RunState::Paused => "PAUSED",
            RunState::WaitingForKey => "WAITING FOR KEY",
            RunState::Fault => "FAULT",
        }
    }

    fn color(self) -> Color {
        match self {
            RunState::Running => Color::Green,
            RunState::Paused => Color::Yellow,
            RunState::WaitingForKey => Color::Cyan,
            RunState::Fault => Color::Red,
        }
    }
}

struct Debugger {
    executor: Executor,
    prompt: String,
    message: String,
    repeat: Option<Command>,
    held_since: [Option<Instant>; 16],
    quit: bool,
}

impl Debugger {
    fn new(args: &Args) -> anyhow::Result<Self> {
        let rom = std::fs::read(&args.rom_path)
            .with_context(|| format!("Failed to read ROM file {}", args.rom_path.display()))?;

        let mut chip8 = match args.seed {
            Some(seed) => Chip8::with_seed(seed),
            None => Chip8::new(),
        };
        chip8.set_strict(args.strict);
        chip8
            .load(&rom)
            .context("Failed to load ROM into CHIP-8 memory")?;

        Ok(Self {
            executor: Executor::new(Chip8Runner::new(chip8, args.speed), rom),
            prompt: String::new(),
            message: "Paused. Type `run`, `step` or `help`".to_string(),
            repeat: None,
            held_since: [None; 16],
            quit: false,
        })
    }

    fn run(&mut self, terminal: &mut DefaultTerminal) -> anyhow::Result<()> {
        let mut last_frame = Instant::now();

        while !self.quit {
            let now = Instant::now();
            let dt = (now - last_frame).as_secs_f32();
            last_frame = now;

            match self.executor.poll(dt) {
                Ok(RunnerResult::HitBreakpoint) => {
                    self.message = format!("Breakpoint at {:03X}", self.executor.get_pc());
                }
                Ok(RunnerResult::Ok) => {}
                Err(e) => self.message = e.to_string(),
            }

            self.release_keys(now);
            terminal.draw(|frame| self.draw(frame))?;

            if event::poll(Duration::from_millis(16))?
                && let Event::Key(key) = event::read()?
            {
                self.on_key(key);
            }
        }

        Ok(())
    }

    fn draw(&self, frame: &mut Frame) {
        frame.render_widget(self, frame.area());
    }

    fn release_keys(&mut self, now: Instant) {
        for (idx, held) in self.held_since.iter_mut().enumerate() {
            if held.is_some_and(|since| now - since > KEY_HOLD) {
                *held = None;
                self.executor
                    .runner_mut()
                    .set_key(u4::new(idx as u8), false);
            }
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.quit = true;
            return;
        }

        if self.executor.is_running() {
            self.on_running_key(key.code);
        } else if key.kind == KeyEventKind::Press {
            self.on_prompt_key(key.code);
        }
    }

    fn on_running_key(&mut self, code: KeyCode) {
        if code == KeyCode::Esc {
            self.executor.execute_pause();
            self.message = format!("Paused at {:03X}", self.executor.get_pc());
        } else if let Some(idx) = KEY_MAP.iter().position(|&k| k == code) {
            self.executor.runner_mut().set_key(u4::new(idx as u8), true);
            self.held_since[idx] = Some(Instant::now());
        }
    }

    fn on_prompt_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc => self.quit = true,
            KeyCode::Enter => self.submit(),
            KeyCode::Backspace => {
                self.prompt.pop();
            }
            KeyCode::Char(c) => self.prompt.push(c),
            _ => {}
        }
    }

    /// Runs the typed command; an empty line repeats the previous one.
    fn submit(&mut self) {
        let line = std::mem::take(&mut self.prompt);

        let command = if line.trim().is_empty() {
            self.repeat.clone()
        } else {
            match Cli::try_parse_from(line.split_whitespace()) {
                Ok(cli) => Some(cli.command),
                Err(e) => {
                    self.message = e.to_string();
                    None
                }
            }
        };

        self.repeat = command.clone();
        if let Some(command) = command {
            self.dispatch(command);
        }
    }

    fn dispatch(&mut self, command: Command) {
        self.message = match self.executor.execute(command) {
            Ok(CommandResult::Ok) => match RunState::of(&self.executor) {
                RunState::WaitingForKey => "Waiting for a key; `run` and press one".to_string(),
                _ => format!("PC {:03X}", self.executor.get_pc()),
            },
            Ok(CommandResult::Quit) => {
                self.quit = true;
                String::new()
            }
            Ok(CommandResult::Breakpoints(breakpoints)) if breakpoints.is_empty() => {
                "No breakpoints".to_string()
            }
            Ok(CommandResult::Breakpoints(breakpoints)) => breakpoints
                .iter()
                .map(|addr| format!("{addr:03X}"))
                .collect::<Vec<_>>()
                .join(" "),
            Ok(CommandResult::MemDump { data, offset }) => format_mem_dump(&data, offset),
            Ok(CommandResult::Disasm {
                instructions,
                offset,
            }) => format_disasm(&instructions, offset),
            Err(e) => e.to_string(),
        };
    }
}

fn format_mem_dump(data: &[u8], offset: u16) -> String {
    data.chunks(16)
        .enumerate()
        .map(|(row, bytes)| {
            let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02X}")).collect();
            format!("{:03X}: {}", offset as usize + row * 16, hex.join(" "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_disasm(instructions: &[(u16, Opcode)], offset: u16) -> String {
    instructions
        .iter()
        .enumerate()
        .map(|(idx, (word, opcode))| {
            format!("{:03X}: {word:04X}  {opcode}", wrap_addr(offset, idx))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One-line form of an engine error for the narrow status panel.
fn fault_summary(fault: &Chip8Error) -> String {
    match fault {
        Chip8Error::StackOverflow { pc } => format!("Stack overflow @{pc:03X}"),
        Chip8Error::StackUnderflow { pc } => format!("Stack underflow @{pc:03X}"),
        Chip8Error::UnknownOpcode { opcode, pc } => format!("Bad op {opcode:04X} @{pc:03X}"),
    }
}

/// Address of the `idx`-th instruction after `start`.
fn wrap_addr(start: u16, idx: usize) -> u16 {
    ((start as usize + idx * 2) % MEMORY_SIZE) as u16
}

impl Widget for &Debugger {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.width < MIN_WIDTH || area.height < MIN_HEIGHT {
            Paragraph::new(format!(
                "Terminal is too small ({}x{}, need {MIN_WIDTH}x{MIN_HEIGHT})",
                area.width, area.height
            ))
            .style(Style::default().fg(Color::Red))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .render(area, buf);
            return;
        }

        let [main, side] =
            Layout::horizontal([Constraint::Min(0), Constraint::Length(SIDE_WIDTH)]).areas(area);
        let [screen, lower, prompt] = Layout::vertical([
            Constraint::Length(SCREEN_HEIGHT),
            Constraint::Min(5),
            Constraint::Length(3),
        ])
        .areas(main);
        let [message, code] =
            Layout::horizontal([Constraint::Min(0), Constraint::Length(30)]).areas(lower);
        let [status, registers, keypad, stack] = Layout::vertical([
            Constraint::Length(7),
            Constraint::Length(12),
            Constraint::Length(6),
            Constraint::Min(3),
        ])
        .areas(side);

        self.render_screen(screen, buf);
        self.render_code(code, buf);
        self.render_status(status, buf);
        self.render_registers(registers, buf);
        self.render_keypad(keypad, buf);
        self.render_stack(stack, buf);

        Paragraph::new(self.message.as_str())
            .wrap(Wrap { trim: false })
            .block(Block::bordered().title(" Output "))
            .render(message, buf);
        Paragraph::new(format!("> {}", self.prompt))
            .block(Block::bordered().title(" Command "))
            .render(prompt, buf);
    }
}

impl Debugger {
    fn render_screen(&self, area: Rect, buf: &mut Buffer) {
        let on = Style::default().fg(Color::Green);
        let lines: Vec<Line> = self
            .executor
            .get_display()
            .iter()
            .map(|row| {
                let text: String = row.iter().map(|&p| if p { '█' } else { ' ' }).collect();
                Line::styled(text, on)
            })
            .collect();

        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .block(Block::bordered().title(" Screen "))
            .render(area, buf);
    }

    fn render_status(&self, area: Rect, buf: &mut Buffer) {
        let state = RunState::of(&self.executor);
        let runner = self.executor.runner_ref();
        let flag = |on: bool| if on { "on" } else { "off" };

        let mut lines = vec![Line::styled(
            state.label(),
            Style::default()
                .fg(state.color())
                .add_modifier(Modifier::BOLD),
        )];
        if let Some(fault) = self.executor.fault() {
            lines.push(Line::styled(
                fault_summary(fault),
                Style::default().fg(Color::Red),
            ));
        }
        lines.push(Line::from(format!(
            "Speed {:?} ({}/frame)",
            runner.speed(),
            runner.speed().steps_per_tick()
        )));
        lines.push(Line::from(vec![
            Span::raw("Sound "),
            Span::styled(
                flag(runner.sound_active()),
                if runner.sound_active() {
                    Style::default().fg(Color::Magenta)
                } else {
                    Style::default()
                },
            ),
            Span::raw(format!("  Strict {}", flag(runner.chip8_ref().is_strict()))),
        ]));

        Paragraph::new(lines)
            .wrap(Wrap { trim: true })
            .block(Block::bordered().title(" Status "))
            .render(area, buf);
    }

    fn render_registers(&self, area: Rect, buf: &mut Buffer) {
        let executor = &self.executor;
        let v = executor.get_v();

        let mut lines = vec![
            Line::from(format!(
                "PC {:03X}   I {:03X}",
                executor.get_pc(),
                executor.get_i()
            )),
            Line::from(format!(
                "DT {:02X}    ST {:02X}",
                executor.get_delay_timer(),
                executor.get_sound_timer()
            )),
        ];
        lines.extend((0..8).map(|idx| {
            Line::from(format!(
                "V{idx:X} {:02X}    V{:X} {:02X}",
                v[idx],
                idx + 8,
                v[idx + 8]
            ))
        }));

        Paragraph::new(lines)
            .block(Block::bordered().title(" Registers "))
            .render(area, buf);
    }

    /// Instructions around PC, with the current one and breakpoints marked.
    fn render_code(&self, area: Rect, buf: &mut Buffer) {
        let pc = self.executor.get_pc();
        let start = wrap_addr(pc, MEMORY_SIZE - CODE_CONTEXT as usize * 2);
        let rows = area.height.saturating_sub(2);

        let lines: Vec<Line> = self
            .executor
            .disassemble(start, rows)
            .into_iter()
            .enumerate()
            .map(|(idx, (word, opcode))| {
                let addr = wrap_addr(start, idx);
                let marker = match (addr == pc, self.executor.breakpoints().contains(&addr)) {
                    (true, _) => '>',
                    (false, true) => '*',
                    (false, false) => ' ',
                };
                let text = format!("{marker}{addr:03X} {word:04X} {opcode}");

                if addr == pc {
                    Line::styled(text, Style::default().fg(Color::Black).bg(Color::White))
                } else if marker == '*' {
                    Line::styled(text, Style::default().fg(Color::Red))
                } else {
                    Line::from(text)
                }
            })
            .collect();

        Paragraph::new(lines)
            .block(Block::bordered().title(" Code "))
            .render(area, buf);
    }

    fn render_keypad(&self, area: Rect, buf: &mut Buffer) {
        const ROWS: [[usize; 4]; 4] = [
            [0x1, 0x2, 0x3, 0xC],
            [0x4, 0x5, 0x6, 0xD],
            [0x7, 0x8, 0x9, 0xE],
            [0xA, 0x0, 0xB, 0xF],
        ];
        let keypad = self.executor.get_keypad();
        let held = Style::default().fg(Color::Black).bg(Color::White);

        let lines: Vec<Line> = ROWS
            .iter()
            .map(|row| {
                let mut spans = Vec::with_capacity(row.len() * 2);
                for (col, &key) in row.iter().enumerate() {
                    if col > 0 {
                        spans.push(Span::raw(" "));
                    }
                    let style = if keypad[key] { held } else { Style::default() };
                    spans.push(Span::styled(format!("{key:X}"), style));
                }
                Line::from(spans)
            })
            .collect();

        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .block(Block::bordered().title(" Keypad "))
            .render(area, buf);
    }

    fn render_stack(&self, area: Rect, buf: &mut Buffer) {
        let stack = self.executor.get_stack();
        let rows = area.height.saturating_sub(2) as usize;

        // Innermost frame first; older frames fall off the bottom
        let mut lines: Vec<Line> = stack
            .iter()
            .enumerate()
            .rev()
            .map(|(depth, addr)| Line::from(format!("{depth:>2}  {addr:03X}")))
            .collect();
        if lines.len() > rows {
            lines.truncate(rows.saturating_sub(1));
            lines.push(Line::from("..."));
        }

        let depth_style = if stack.len() == STACK_SIZE {
            Style::default().fg(Color::Red)
        } else {
            Style::default()
        };
        let title = Line::from(vec![
            Span::raw(" Stack "),
            Span::styled(format!("{}/{STACK_SIZE}", stack.len()), depth_style),
            Span::raw(" "),
        ]);

        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .block(Block::bordered().title(title))
            .render(area, buf);
    }
}

/// Terminal debugger for CHIP-8 programs.
///
/// Starts paused. While running, Esc pauses and keys 1-4, Q-R, A-F, Z-V
/// press CHIP-8 keys. While paused, commands are typed at the prompt,
/// an empty line repeats the last one and Esc exits.
#[derive(Parser)]
#[command(about)]
struct Args {
    /// Path to the ROM file to load
    rom_path: PathBuf,

    /// Instructions executed per 60Hz frame while running
    #[arg(short, long, value_enum, default_value_t = Speed::Normal)]
    speed: Speed,

    /// Stop on unknown opcodes instead of skipping them
    #[arg(long)]
    strict: bool,

    /// Seed for the random number instruction
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut debugger = Debugger::new(&args).context("Failed to initialize debugger")?;

    let mut terminal = ratatui::init();
    let result = debugger.run(&mut terminal);
    ratatui::restore();

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor_with(rom: &[u8]) -> Executor {
        let mut chip8 = Chip8::with_seed(1);
        chip8.load(rom).unwrap();
        Executor::new(Chip8Runner::new(chip8, Speed::Normal), rom.to_vec())
    }

    #[test]
    fn state_follows_executor() {
        // LD V0 K, then RET on an empty stack
        let mut executor = executor_with(&[0xF0, 0x0A, 0x00, 0xEE]);
        assert_eq!(RunState::of(&executor), RunState::Paused);

        executor.execute_run();
        assert_eq!(RunState::of(&executor), RunState::Running);

        executor.execute_pause();
        executor.execute_step(1).unwrap();
        assert_eq!(RunState::of(&executor), RunState::WaitingForKey);

        executor.runner_mut().set_key(u4::new(0x2), true);
        executor.execute_step(1).unwrap();
        assert_eq!(RunState::of(&executor), RunState::Paused);

        assert!(executor.execute_step(1).is_err());
        assert_eq!(RunState::of(&executor), RunState::Fault);
    }

    #[test]
    fn fault_summary_names_the_address() {
        assert_eq!(
            fault_summary(&Chip8Error::StackOverflow { pc: 0x2A4 }),
            "Stack overflow @2A4"
        );
        assert_eq!(
            fault_summary(&Chip8Error::UnknownOpcode {
                opcode: 0xFFFF,
                pc: 0x200
            }),
            "Bad op FFFF @200"
        );
    }

    #[test]
    fn mem_dump_breaks_every_sixteen_bytes() {
        let data: Vec<u8> = (0..18).collect();

        let text = format_mem_dump(&data, 0x200);

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("200: 00 01 02"));
        assert_eq!(lines[1], "210: 10 11");
    }

    #[test]
    fn disasm_addresses_wrap_at_end_of_memory() {
        let instructions = [
            (0x00E0, Opcode::decode(0x00E0)),
            (0x1200, Opcode::decode(0x1200)),
        ];

        let text = format_disasm(&instructions, 0xFFE);

        assert_eq!(text, "FFE: 00E0  CLS\n000: 1200  JP 200");
    }
}
