use minishell::Interpreter;

fn main() {
    // arguments are accepted and ignored; the shell only talks to its tty
    env_logger::init();

    let mut shell = Interpreter::new();
    match shell.repl() {
        Ok(status) => std::process::exit(status),
        Err(err) => {
            eprintln!("minishell: {:#}", err);
            std::process::exit(1);
        }
    }
}
