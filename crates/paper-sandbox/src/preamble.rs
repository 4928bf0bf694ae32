//! Code wrapping for sandboxed execution.
//!
//! Every snippet is executed with a fixed header (non-interactive plotting
//! backend, `chdir` into the workspace, guarded science imports, plot output
//! directory) and a footer that saves any still-open figures under
//! `outputs/plots/` and prints one summary line.

/// Wrap user code with the execution preamble and figure-saving postamble.
pub fn prepare(code: &str, workspace_dir: &str) -> String {
    let header = format!(
        r#"# -*- coding: utf-8 -*-
import os
import sys

try:
    import matplotlib
    matplotlib.use('Agg')
    import matplotlib.pyplot as plt
except ImportError:
    plt = None

os.chdir(r"{workspace_dir}")

try:
    import numpy as np
except ImportError:
    pass

try:
    import scipy
except ImportError:
    pass

try:
    import pandas as pd
except ImportError:
    pass

plt_output_dir = "outputs/plots"
os.makedirs(plt_output_dir, exist_ok=True)

"#
    );

    let footer = r#"

plot_files = []
if plt is not None:
    for fig_num in plt.get_fignums():
        fig = plt.figure(fig_num)
        filename = f"plot_{fig_num}.png"
        filepath = os.path.join(plt_output_dir, filename)
        fig.savefig(filepath, dpi=300, bbox_inches='tight')
        plot_files.append(f"outputs/plots/{filename}")
        plt.close(fig)

if plot_files:
    print(f"\n图表已保存: {', '.join(plot_files)}")
"#;

    format!("{header}{code}{footer}")
}
