use scout_runtime::{Tool, ToolLocator};

use crate::config::AgentConfig;

pub fn run(config: &AgentConfig) {
	print!("{}", render(&config.locator()));
}

fn render(locator: &ToolLocator) -> String {
	let mut out = String::new();
	for tool in Tool::ALL {
		let spec = tool.spec();
		let status = match locator.resolve(spec.executable) {
			Some(path) => path.display().to_string(),
			None => "not installed".to_string(),
		};
		out.push_str(&format!("{:<10} {:<40} {}\n", spec.name, spec.description, status));
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn lists_every_allowed_tool() {
		let rendered = render(&ToolLocator::default());
		let names: Vec<_> = rendered.lines().filter_map(|l| l.split_whitespace().next()).collect();
		assert_eq!(names, ["subfinder", "nmap", "gobuster", "ffuf", "nuclei", "amass"]);
	}
}
