mod random_cycles;
