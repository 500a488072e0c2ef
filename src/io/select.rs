use std::io::{self, stdin, stdout, BufRead, Write};

use crate::error::{PortRole, RelayError};

/// Where the input comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputChoice {
    Virtual,
    Index(usize),
}

/// Resolved ports for a session. `output == None` means degraded output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSelection {
    pub input: InputChoice,
    pub output: Option<usize>,
}

/// Operator preferences applied before falling back to prompting.
#[derive(Debug, Clone, Default)]
pub struct PortPreferences {
    pub virtual_input: bool,
    pub input_index: Option<usize>,
    pub output_index: Option<usize>,
    pub input_match: Option<String>,
    pub output_match: Option<String>,
}

/// Something that can ask an operator to pick a port.
pub trait PortChooser {
    /// Return the raw answer for `role` given the candidate names.
    fn prompt(&mut self, role: PortRole, candidates: &[String]) -> Result<String, RelayError>;

    /// Called after an answer was rejected, before the next prompt.
    fn rejected(&mut self, err: &RelayError) {
        log::warn!("{}", err);
    }
}

/// Prompts on the terminal, like a human would expect.
pub struct StdinChooser;

impl PortChooser for StdinChooser {
    fn prompt(&mut self, role: PortRole, candidates: &[String]) -> Result<String, RelayError> {
        println!("\nAvailable {} ports:", role);
        for (i, name) in candidates.iter().enumerate() {
            println!("{}: {}", i, name);
        }
        print!("Please select {} port: ", role);
        stdout().flush().map_err(RelayError::Prompt)?;
        let mut choice = String::new();
        let read = stdin()
            .lock()
            .read_line(&mut choice)
            .map_err(RelayError::Prompt)?;
        if read == 0 {
            return Err(RelayError::Prompt(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "no answer on standard input",
            )));
        }
        Ok(choice)
    }

    fn rejected(&mut self, err: &RelayError) {
        println!("{}", err);
    }
}

/// Validate one answer against the number of candidates.
pub fn parse_selection(role: PortRole, answer: &str, count: usize) -> Result<usize, RelayError> {
    match answer.trim().parse::<usize>() {
        Ok(idx) if idx < count => Ok(idx),
        _ => Err(RelayError::InvalidSelection {
            role,
            answer: answer.trim().to_string(),
            count,
        }),
    }
}

fn find_by_name(candidates: &[String], pattern: &str, exclude: Option<&str>) -> Option<usize> {
    let pattern = pattern.to_lowercase();
    candidates.iter().position(|name| {
        name.to_lowercase().contains(&pattern) && Some(name.as_str()) != exclude
    })
}

fn choose_port(
    role: PortRole,
    candidates: &[String],
    index: Option<usize>,
    name_match: Option<&str>,
    exclude: Option<&str>,
    chooser: &mut dyn PortChooser,
) -> Result<usize, RelayError> {
    if let Some(idx) = index {
        if idx >= candidates.len() {
            return Err(RelayError::PortOpen {
                role,
                port: idx.to_string(),
                reason: format!("index out of range ({} ports)", candidates.len()),
            });
        }
        log::info!("Choosing {} port #{}: {}", role, idx, candidates[idx]);
        return Ok(idx);
    }

    if let Some(pattern) = name_match.filter(|p| !p.is_empty()) {
        match find_by_name(candidates, pattern, exclude) {
            Some(idx) => {
                log::info!("Choosing {} port matching '{}': {}", role, pattern, candidates[idx]);
                return Ok(idx);
            }
            None => log::info!("No {} port matches '{}'", role, pattern),
        }
    }

    if candidates.len() == 1 {
        log::info!("Choosing the only available {} port: {}", role, candidates[0]);
        return Ok(0);
    }

    loop {
        let answer = chooser.prompt(role, candidates)?;
        match parse_selection(role, &answer, candidates.len()) {
            Ok(idx) => {
                log::info!("Choosing {} port #{}: {}", role, idx, candidates[idx]);
                return Ok(idx);
            }
            Err(err) => chooser.rejected(&err),
        }
    }
}

/// Resolve one input and at most one output.
///
/// A virtual input skips input enumeration entirely. Zero inputs is fatal;
/// zero outputs leaves the session with degraded output unless an output
/// index was requested explicitly. A single candidate
/// is taken without asking; several go through `chooser`, which is asked
/// again until the answer is in range.
pub fn select_ports(
    inputs: &[String],
    outputs: &[String],
    prefs: &PortPreferences,
    chooser: &mut dyn PortChooser,
) -> Result<PortSelection, RelayError> {
    let (input, input_name) = if prefs.virtual_input {
        log::info!("Using a virtual input port");
        (InputChoice::Virtual, None)
    } else {
        if inputs.is_empty() {
            return Err(RelayError::NoInputPort);
        }
        let idx = choose_port(
            PortRole::Input,
            inputs,
            prefs.input_index,
            prefs.input_match.as_deref(),
            None,
            chooser,
        )?;
        (InputChoice::Index(idx), Some(inputs[idx].as_str()))
    };

    let output = if outputs.is_empty() {
        if let Some(idx) = prefs.output_index {
            return Err(RelayError::PortOpen {
                role: PortRole::Output,
                port: idx.to_string(),
                reason: "no output ports available".to_string(),
            });
        }
        log::warn!("No MIDI output port available, output is degraded");
        None
    } else {
        Some(choose_port(
            PortRole::Output,
            outputs,
            prefs.output_index,
            prefs.output_match.as_deref(),
            input_name,
            chooser,
        )?)
    };

    Ok(PortSelection { input, output })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    /// Replays canned answers and remembers what was rejected.
    struct ScriptedChooser {
        answers: VecDeque<&'static str>,
        prompts: usize,
        rejected: Vec<String>,
    }

    impl ScriptedChooser {
        fn new(answers: &[&'static str]) -> Self {
            Self {
                answers: answers.iter().copied().collect(),
                prompts: 0,
                rejected: Vec::new(),
            }
        }
    }

    impl PortChooser for ScriptedChooser {
        fn prompt(&mut self, _role: PortRole, _candidates: &[String]) -> Result<String, RelayError> {
            self.prompts += 1;
            self.answers
                .pop_front()
                .map(str::to_string)
                .ok_or_else(|| RelayError::Prompt(io::Error::new(io::ErrorKind::UnexpectedEof, "script exhausted")))
        }

        fn rejected(&mut self, err: &RelayError) {
            self.rejected.push(err.to_string());
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_out_of_range_answer_is_reprompted() {
        let inputs = names(&["Keys", "Pads", "Drums"]);
        let outputs = names(&["Synth"]);
        let mut chooser = ScriptedChooser::new(&["5", "1"]);
        let selection = select_ports(&inputs, &outputs, &PortPreferences::default(), &mut chooser).unwrap();
        assert_eq!(
            selection,
            PortSelection {
                input: InputChoice::Index(1),
                output: Some(0),
            }
        );
        assert_eq!(chooser.prompts, 2);
        assert_eq!(chooser.rejected.len(), 1);
        assert!(chooser.rejected[0].contains("'5'"));
    }

    #[test]
    fn test_non_numeric_answer_is_reprompted() {
        let inputs = names(&["A", "B"]);
        let mut chooser = ScriptedChooser::new(&["first", "-1", "0"]);
        let selection = select_ports(&inputs, &[], &PortPreferences::default(), &mut chooser).unwrap();
        assert_eq!(selection.input, InputChoice::Index(0));
        assert_eq!(chooser.rejected.len(), 2);
    }

    #[test]
    fn test_no_input_ports_is_fatal() {
        let mut chooser = ScriptedChooser::new(&[]);
        let err = select_ports(&[], &names(&["Synth"]), &PortPreferences::default(), &mut chooser).unwrap_err();
        assert!(matches!(err, RelayError::NoInputPort));
    }

    #[test]
    fn test_no_output_ports_is_degraded() {
        let mut chooser = ScriptedChooser::new(&[]);
        let selection = select_ports(&names(&["Keys"]), &[], &PortPreferences::default(), &mut chooser).unwrap();
        assert_eq!(selection.input, InputChoice::Index(0));
        assert_eq!(selection.output, None);
        assert_eq!(chooser.prompts, 0);
    }

    #[test]
    fn test_explicit_output_without_output_ports_is_fatal() {
        let prefs = PortPreferences {
            output_index: Some(0),
            ..Default::default()
        };
        let mut chooser = ScriptedChooser::new(&[]);
        let err = select_ports(&names(&["Keys"]), &[], &prefs, &mut chooser).unwrap_err();
        assert!(matches!(err, RelayError::PortOpen { role: PortRole::Output, .. }));
        assert!(err.is_pre_start());
    }

    #[test]
    fn test_virtual_input_skips_enumeration() {
        let prefs = PortPreferences {
            virtual_input: true,
            ..Default::default()
        };
        let mut chooser = ScriptedChooser::new(&[]);
        let selection = select_ports(&[], &names(&["Synth"]), &prefs, &mut chooser).unwrap();
        assert_eq!(selection.input, InputChoice::Virtual);
        assert_eq!(selection.output, Some(0));
    }

    #[test]
    fn test_explicit_index() {
        let prefs = PortPreferences {
            input_index: Some(2),
            ..Default::default()
        };
        let mut chooser = ScriptedChooser::new(&[]);
        let selection = select_ports(&names(&["A", "B", "C"]), &[], &prefs, &mut chooser).unwrap();
        assert_eq!(selection.input, InputChoice::Index(2));

        let prefs = PortPreferences {
            input_index: Some(3),
            ..Default::default()
        };
        let err = select_ports(&names(&["A", "B", "C"]), &[], &prefs, &mut chooser).unwrap_err();
        assert!(matches!(err, RelayError::PortOpen { role: PortRole::Input, .. }));
    }

    #[test]
    fn test_name_match_skips_same_device_for_output() {
        let inputs = names(&["Midi Through", "MRCC Port 1"]);
        let outputs = names(&["MRCC Port 1", "MIDIOUT7 (MRCC)"]);
        let prefs = PortPreferences {
            input_match: Some("mrcc".to_string()),
            output_match: Some("MRCC".to_string()),
            ..Default::default()
        };
        let mut chooser = ScriptedChooser::new(&[]);
        let selection = select_ports(&inputs, &outputs, &prefs, &mut chooser).unwrap();
        assert_eq!(selection.input, InputChoice::Index(1));
        assert_eq!(selection.output, Some(1));
    }

    #[test]
    fn test_unmatched_name_falls_back_to_prompt() {
        let prefs = PortPreferences {
            input_match: Some("nothing".to_string()),
            ..Default::default()
        };
        let mut chooser = ScriptedChooser::new(&["1"]);
        let selection = select_ports(&names(&["A", "B"]), &[], &prefs, &mut chooser).unwrap();
        assert_eq!(selection.input, InputChoice::Index(1));
    }

    #[test]
    fn test_exhausted_chooser_aborts() {
        let mut chooser = ScriptedChooser::new(&["9"]);
        let err = select_ports(&names(&["A", "B"]), &[], &PortPreferences::default(), &mut chooser).unwrap_err();
        assert!(matches!(err, RelayError::Prompt(_)));
    }
}
