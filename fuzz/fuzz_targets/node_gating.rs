#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use cosim_runtime::NodeState;
use cosim_wire::StepRelease;

#[derive(Arbitrary, Debug)]
enum Event {
    Release { time: u8, duration: u8 },
    Input { slot: u8, value: f32 },
    Step,
}

fuzz_target!(|events: Vec<Event>| {
    let inputs = ["a", "b", "c"];
    let mut state = NodeState::new(inputs, false);
    let mut granted = 0u64;

    for event in events {
        match event {
            Event::Release { time, duration } => {
                if state.grant(StepRelease::new(time as f64, duration as f64), None) {
                    granted += 1;
                }
            }
            Event::Input { slot, value } => {
                state.collect(inputs[slot as usize % inputs.len()], value as f64);
            }
            Event::Step => {
                if let Some(pending) = state.begin_step() {
                    state.finish_step(pending.release);
                }
            }
        }
        // Never more steps than permissions
        assert!(state.steps_executed() <= granted);
    }
});
