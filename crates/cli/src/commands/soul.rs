//! `mindloop soul`: Print the rendered soul prompt.

use mindloop_memory::get_soul_prompt;

use crate::runtime::Runtime;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::load().await?;
    println!("{}", get_soul_prompt(&runtime.soul));
    Ok(())
}
